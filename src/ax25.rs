/*! AX.25 address and frame codec.

[AX.25][ax25] is the link layer used by [APRS][aprs]. This module
handles the byte level frame structure: 7-byte shifted addresses,
control/PID, info field, and the [CRC-16/X.25](crate::crc) frame check
sequence. The bit level (flags, stuffing, NRZI) lives in
[`hdlc`](crate::hdlc) and [`framer`](crate::framer).

Only UI frames are produced (control 0x03, PID 0xf0), which is all APRS
ever uses. The decoder does not interpret the control field beyond
carrying it.

[ax25]: https://en.wikipedia.org/wiki/AX.25
[aprs]: https://en.wikipedia.org/wiki/Automatic_Packet_Reporting_System
*/
use crate::crc::calc_crc;
use crate::{Error, Result};

/// UI frame control byte.
pub const CONTROL_UI: u8 = 0x03;

/// "No layer 3" PID.
pub const PID_NO_L3: u8 = 0xf0;

/// Maximum number of digipeater addresses in a frame.
pub const MAX_PATH: usize = 8;

/// Shortest plausible frame: two addresses, control, PID, FCS.
pub const MIN_FRAME_LEN: usize = 16;

/// An AX.25 address: callsign, SSID, and flags.
///
/// Two textual shapes exist. Plain station addresses like `N0CALL-10`
/// carry an SSID. Path aliases like `WIDE2-1` fold a trailing digit of
/// the base text into `n`, with the remaining hop count in `hops`; on
/// the wire the hop count occupies the SSID slot. `mark` is the H-bit:
/// this digipeater has already handled the packet, rendered as a
/// trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Base callsign text, without the WIDEn digit.
    pub callsign: String,
    /// The n of a WIDEn-N alias, 0 when absent.
    pub n: u8,
    /// The N of a WIDEn-N alias (remaining hops), 0 when absent.
    pub hops: u8,
    /// Secondary station identifier, 0-15.
    pub ssid: u8,
    /// H-bit: address already digipeated.
    pub mark: bool,
}

impl Address {
    /// The callsign as transmitted, with any WIDEn digit re-attached.
    #[must_use]
    pub fn encoded_callsign(&self) -> String {
        if self.n > 0 {
            format!("{}{}", self.callsign, self.n)
        } else {
            self.callsign.clone()
        }
    }

    /// The value transmitted in the SSID slot.
    #[must_use]
    pub fn encoded_ssid(&self) -> u8 {
        if self.n > 0 { self.hops } else { self.ssid }
    }

    /// Whether this address would pass a strict validator: 1-6
    /// characters, A-Z and 0-9 only, SSID within 0-15.
    #[must_use]
    pub fn valid(&self) -> bool {
        let text = self.encoded_callsign();
        !text.is_empty()
            && text.len() <= 6
            && text.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            && self.encoded_ssid() <= 15
    }

    /// Encode into the 7-byte wire form. `last` sets the
    /// end-of-address bit.
    #[must_use]
    pub fn encode(&self, last: bool) -> [u8; 7] {
        encode_address(&self.encoded_callsign(), self.encoded_ssid(), self.mark, last)
    }

    /// Decode from the 7-byte wire form. Returns the address and
    /// whether the end-of-address bit was set. Non-alphanumeric
    /// characters are preserved verbatim; [`Address::valid`] flags
    /// them.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<(Address, bool)> {
        if bytes.len() < 7 {
            return None;
        }
        let mut callsign: String = bytes[..6].iter().map(|b| (b >> 1) as char).collect();
        while callsign.ends_with(' ') {
            callsign.pop();
        }
        let ssid = (bytes[6] >> 1) & 0x0f;
        let mark = (bytes[6] & 0x80) != 0;
        let last = (bytes[6] & 0x01) != 0;
        Some((
            Address {
                callsign,
                n: 0,
                hops: 0,
                ssid,
                mark,
            },
            last,
        ))
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (s, mark) = match s.strip_suffix('*') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let (base, suffix) = match s.split_once('-') {
            Some((b, suf)) => (b, Some(suf)),
            None => (s, None),
        };
        if base.is_empty() {
            return Err(Error::InvalidInput(format!("empty address: {s:?}")));
        }
        let value = match suffix {
            None => 0,
            Some(suf) => suf
                .parse::<u8>()
                .ok()
                .filter(|v| *v <= 15)
                .ok_or_else(|| Error::InvalidInput(format!("bad SSID in address: {s:?}")))?,
        };
        // A base ending in a digit is a WIDEn-N style alias. The digit
        // folds into n and the suffix is the hop count, not an SSID.
        let last = base.chars().next_back().unwrap();
        if let Some(n) = last.to_digit(10) {
            Ok(Address {
                callsign: base[..base.len() - 1].to_string(),
                n: n as u8,
                hops: value,
                ssid: 0,
                mark,
            })
        } else {
            Ok(Address {
                callsign: base.to_string(),
                n: 0,
                hops: 0,
                ssid: value,
                mark,
            })
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.callsign)?;
        if self.n > 0 {
            write!(f, "{}", self.n)?;
        }
        if self.n > 0 {
            if self.hops > 0 {
                write!(f, "-{}", self.hops)?;
            }
        } else if self.ssid > 0 {
            write!(f, "-{}", self.ssid)?;
        }
        if self.mark {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// A packet at the textual level: the canonical form for APIs facing
/// the user and the observer callbacks.
///
/// Renders and parses as `SRC>DST[,PATH…]:INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Source address text.
    pub from: String,
    /// Destination address text.
    pub to: String,
    /// Digipeater path, in order.
    pub path: Vec<String>,
    /// Info field. Arbitrary bytes; APRS payloads are usually but not
    /// always printable.
    pub data: Vec<u8>,
}

impl Packet {
    /// Convenience constructor from text parts.
    pub fn new(from: &str, to: &str, path: &[&str], data: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
            data: data.into(),
        }
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}>{}", self.from, self.to)?;
        for p in &self.path {
            write!(f, ",{p}")?;
        }
        write!(f, ":{}", String::from_utf8_lossy(&self.data))
    }
}

impl std::str::FromStr for Packet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (from, rest) = s
            .split_once('>')
            .ok_or_else(|| Error::InvalidInput(format!("packet without '>': {s:?}")))?;
        let (header, data) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("packet without ':': {s:?}")))?;
        let mut parts = header.split(',');
        let to = parts.next().unwrap_or_default();
        if from.is_empty() || to.is_empty() {
            return Err(Error::InvalidInput(format!("packet without addresses: {s:?}")));
        }
        Ok(Packet {
            from: from.to_string(),
            to: to.to_string(),
            path: parts.map(|p| p.to_string()).collect(),
            data: data.as_bytes().to_vec(),
        })
    }
}

/// A decoded frame: parsed addresses plus the received FCS.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Source address.
    pub from: Address,
    /// Destination address.
    pub to: Address,
    /// Digipeater path.
    pub path: Vec<Address>,
    /// Info field.
    pub data: Vec<u8>,
    /// Frame check sequence as received (or computed, for frames that
    /// arrived without one).
    pub fcs: u16,
}

impl Frame {
    /// Render to the textual packet form.
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        Packet {
            from: self.from.to_string(),
            to: self.to.to_string(),
            path: self.path.iter().map(|a| a.to_string()).collect(),
            data: self.data.clone(),
        }
    }

    /// Encode to frame bytes including the FCS.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = encode_header(&self.from, &self.to, &self.path);
        out.push(CONTROL_UI);
        out.push(PID_NO_L3);
        out.extend_from_slice(&self.data);
        let fcs = calc_crc(&out);
        out.extend_from_slice(&fcs.to_le_bytes());
        out
    }
}

impl From<&Frame> for Packet {
    fn from(f: &Frame) -> Packet {
        f.to_packet()
    }
}

/// Encode a single address into wire form.
///
/// The callsign is space padded to six characters and each character
/// left shifted by one. Byte 7 carries the SSID in bits 1-4, the H-bit
/// in bit 7, and the end-of-address marker in bit 0.
#[must_use]
pub fn encode_address(callsign: &str, ssid: u8, mark: bool, last: bool) -> [u8; 7] {
    let mut out = [b' ' << 1; 7];
    for (o, c) in out.iter_mut().zip(callsign.bytes().take(6)) {
        *o = c << 1;
    }
    out[6] = 0x60 | ((ssid & 0x0f) << 1) | u8::from(last);
    if mark {
        out[6] |= 0x80;
    }
    out
}

/// Encode the address header: destination, source, then path. The
/// end-of-address bit is set on the last address only.
#[must_use]
pub fn encode_header(from: &Address, to: &Address, path: &[Address]) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 * (2 + path.len()));
    out.extend_from_slice(&to.encode(false));
    out.extend_from_slice(&from.encode(path.is_empty()));
    for (i, p) in path.iter().enumerate() {
        out.extend_from_slice(&p.encode(i + 1 == path.len()));
    }
    out
}

/// Encode a packet into frame bytes including the FCS.
///
/// Address strings are parsed on the way in; a malformed address is
/// rejected, as is a path longer than [`MAX_PATH`].
pub fn encode_frame(p: &Packet) -> Result<Vec<u8>> {
    if p.path.len() > MAX_PATH {
        return Err(Error::InvalidInput(format!("path too long: {}", p.path.len())));
    }
    let from: Address = p.from.parse()?;
    let to: Address = p.to.parse()?;
    let path = p
        .path
        .iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<Address>>>()?;
    Ok(Frame {
        from,
        to,
        path,
        data: p.data.clone(),
        fcs: 0,
    }
    .encode())
}

// Scan the address field. Returns the parsed addresses and the offset
// of the control byte.
//
// Tolerance: some encoders forget the end-of-address bit. After two
// addresses, a block starting with the UI control byte ends the scan.
fn scan_addresses(bytes: &[u8]) -> Option<(Vec<Address>, usize)> {
    let mut addresses = Vec::new();
    let mut offset = 0;
    loop {
        if addresses.len() == 2 + MAX_PATH {
            return None;
        }
        if addresses.len() >= 2 && bytes.get(offset) == Some(&CONTROL_UI) {
            return Some((addresses, offset));
        }
        let (addr, last) = Address::decode(bytes.get(offset..offset + 7)?)?;
        addresses.push(addr);
        offset += 7;
        if last {
            return Some((addresses, offset));
        }
    }
}

fn decode_frame_inner(bytes: &[u8], fcs: u16) -> Option<Frame> {
    let (mut addresses, offset) = scan_addresses(bytes)?;
    if addresses.len() < 2 || bytes.len() < offset + 2 {
        return None;
    }
    let _control = bytes[offset];
    let _pid = bytes[offset + 1];
    let data = bytes[offset + 2..].to_vec();
    let to = addresses.remove(0);
    let from = addresses.remove(0);
    Some(Frame {
        from,
        to,
        path: addresses,
        data,
        fcs,
    })
}

/// Decode frame bytes. The FCS over everything but the last two bytes
/// must match those two bytes (transmitted low byte first); a mismatch
/// rejects the frame.
#[must_use]
pub fn decode_frame(bytes: &[u8]) -> Option<Frame> {
    if bytes.len() < MIN_FRAME_LEN {
        return None;
    }
    let (body, fcs_bytes) = bytes.split_at(bytes.len() - 2);
    let fcs = u16::from_le_bytes([fcs_bytes[0], fcs_bytes[1]]);
    if calc_crc(body) != fcs {
        log::debug!(
            "frame rejected, want fcs {:04x}, got {:04x}",
            calc_crc(body),
            fcs
        );
        return None;
    }
    decode_frame_inner(body, fcs)
}

/// Decode frame bytes that arrived without an FCS, as in a KISS data
/// frame where the TNC has already verified and stripped it.
#[must_use]
pub fn decode_frame_no_fcs(bytes: &[u8]) -> Option<Frame> {
    if bytes.len() < MIN_FRAME_LEN - 2 {
        return None;
    }
    decode_frame_inner(bytes, calc_crc(bytes))
}
