/*! FX.25 forward error correction wrapper.

[FX.25][fx25] protects an AX.25 frame with a Reed-Solomon outer block.
A 64-bit correlation tag, sent little-endian ahead of the block,
identifies which RS(n,k) geometry follows; the data area is the HDLC
flag delimited frame padded to k bytes with `0x7e`, then n−k check
bytes. Nothing inside the block is bit stuffed; the outer HDLC layer
only adds preamble and postamble flags around it.

The tag values and geometries are the ones deployed FX.25 TNCs agree
on. Tag_00 (0x566ED2717946107E) is reserved and never transmitted.

[fx25]: https://en.wikipedia.org/wiki/FX.25_Forward_Error_Correction
*/
use log::debug;

use crate::ax25::Frame;
use crate::hdlc::FLAG;
use crate::reed_solomon;
use crate::{Error, Result};

/// Largest data area any tag supports.
pub const MAX_DATA: usize = 239;

/// One entry of the correlation tag table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationTag {
    /// Tag value, transmitted little-endian.
    pub tag: u64,
    /// Total block size n.
    pub n: usize,
    /// Data area size k.
    pub k: usize,
    /// Check bytes, n − k.
    pub check: usize,
}

/// The correlation tag table, Tag_01 through Tag_0B.
pub static TAGS: &[CorrelationTag] = &[
    CorrelationTag { tag: 0xB74DB7DF8A532F3E, n: 255, k: 239, check: 16 },
    CorrelationTag { tag: 0x26FF60A600CC8FDE, n: 144, k: 128, check: 16 },
    CorrelationTag { tag: 0xC7DC0508F3D9B09E, n: 80, k: 64, check: 16 },
    CorrelationTag { tag: 0x8F056EB4369660EE, n: 48, k: 32, check: 16 },
    CorrelationTag { tag: 0x6E260B1AC5835FAE, n: 255, k: 223, check: 32 },
    CorrelationTag { tag: 0xFF94DC634F1CFF4E, n: 160, k: 128, check: 32 },
    CorrelationTag { tag: 0x1EB7B9CDBC09C00E, n: 96, k: 64, check: 32 },
    CorrelationTag { tag: 0xDBF869BD2DBB1776, n: 64, k: 32, check: 32 },
    CorrelationTag { tag: 0x3ADB0C13DEAE2836, n: 255, k: 191, check: 64 },
    CorrelationTag { tag: 0xAB69DB6A543188D6, n: 192, k: 128, check: 64 },
    CorrelationTag { tag: 0x4A4ABEC4A724B796, n: 128, k: 64, check: 64 },
];

/// Look up a received tag value.
#[must_use]
pub fn find_tag(value: u64) -> Option<&'static CorrelationTag> {
    TAGS.iter().find(|t| t.tag == value)
}

/// Pick the smallest data area that fits `len` bytes with the given
/// check byte count.
#[must_use]
pub fn pick_tag(len: usize, check: usize) -> Option<&'static CorrelationTag> {
    TAGS.iter()
        .filter(|t| t.check == check && t.k >= len)
        .min_by_key(|t| t.k)
}

/// Wrap AX.25 frame bytes (still carrying their FCS) in an FX.25
/// block: tag, frame, `0x7e` padding to k, check bytes.
///
/// `check` selects 16, 32 or 64 check bytes; 0 means the default 16.
/// Frames that do not fit any tag geometry are rejected.
pub fn encode_fx25_frame(frame: &[u8], check: usize) -> Result<Vec<u8>> {
    let check = if check == 0 { 16 } else { check };
    if !matches!(check, 16 | 32 | 64) {
        return Err(Error::InvalidInput(format!("bad check byte count: {check}")));
    }
    let tag = pick_tag(frame.len(), check).ok_or_else(|| {
        Error::InvalidInput(format!("frame too large for FX.25: {} bytes", frame.len()))
    })?;
    let mut out = Vec::with_capacity(8 + tag.n);
    out.extend_from_slice(&tag.tag.to_le_bytes());
    out.extend_from_slice(frame);
    out.resize(8 + tag.k, FLAG);
    let parity = reed_solomon::encode(&out[8..], tag.check);
    out.extend_from_slice(&parity);
    Ok(out)
}

/// Decode an FX.25 block back into a frame.
///
/// Corrects up to ⌊check/2⌋ byte errors in the block, strips flag
/// delimiters and padding, and FCS-gates the recovered frame. Returns
/// the frame and the number of corrected bytes.
pub fn decode_fx25_frame(bytes: &[u8]) -> Result<(Frame, usize)> {
    if bytes.len() < 8 {
        return Err(Error::InvalidInput("short FX.25 block".to_string()));
    }
    let value = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    let tag = find_tag(value)
        .ok_or_else(|| Error::InvalidInput(format!("unknown correlation tag {value:#018x}")))?;
    let block = bytes
        .get(8..8 + tag.n)
        .ok_or_else(|| Error::InvalidInput("truncated FX.25 block".to_string()))?;
    let mut block = block.to_vec();
    let corrected = reed_solomon::decode(&mut block, tag.check)?;
    if corrected > 0 {
        debug!("FX.25 block corrected {corrected} byte errors");
    }

    // Data area: [flags] frame [flags] padding. The frame itself may
    // contain 0x7e bytes, so trim from the back one byte at a time and
    // let the FCS decide where the frame really ends.
    let mut data = &block[..tag.k];
    while data.first() == Some(&FLAG) {
        data = &data[1..];
    }
    while data.len() >= crate::ax25::MIN_FRAME_LEN {
        if let Some(frame) = crate::ax25::decode_frame(data) {
            return Ok((frame, corrected));
        }
        if data.last() == Some(&FLAG) {
            data = &data[..data.len() - 1];
        } else {
            break;
        }
    }
    Err(Error::InvalidInput("no valid frame in FX.25 block".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ax25::{Packet, encode_frame};
    use anyhow::Result;

    fn s3_packet() -> Packet {
        Packet::new(
            "W7ION-5",
            "T7SVVQ",
            &["WIDE1-1", "WIDE2-1"],
            &br#"`2(al"|[/>"3u}hello world^"#[..],
        )
    }

    #[test]
    fn encode_known_block() -> Result<()> {
        let frame = encode_frame(&s3_packet())?;
        assert_eq!(frame.len(), 58);
        let block = encode_fx25_frame(&frame, 0)?;
        assert_eq!(block.len(), 88);
        // Tag_03: RS(80,64)
        assert_eq!(&block[..8], &[0x9E, 0xB0, 0xD9, 0xF3, 0x08, 0x05, 0xDC, 0xC7]);
        assert_eq!(&block[8..66], &frame[..]);
        assert_eq!(&block[66..72], &[0x7E; 6]);
        assert_eq!(
            &block[72..],
            &[
                0x02, 0xFC, 0xED, 0x9F, 0x4B, 0x8E, 0x6A, 0x33, //.
                0xA6, 0x03, 0x4B, 0x67, 0x45, 0x3B, 0xAB, 0x7E,
            ]
        );
        Ok(())
    }

    #[test]
    fn tag_selection() {
        for (len, check, want_k) in [
            (30, 16, 32),
            (32, 16, 32),
            (33, 16, 64),
            (58, 16, 64),
            (65, 16, 128),
            (129, 16, 239),
            (239, 16, 239),
            (32, 32, 32),
            (64, 32, 64),
            (128, 32, 128),
            (223, 32, 223),
            (64, 64, 64),
            (128, 64, 128),
            (191, 64, 191),
        ] {
            assert_eq!(pick_tag(len, check).unwrap().k, want_k, "{len}/{check}");
        }
        assert!(pick_tag(240, 16).is_none());
        assert!(pick_tag(224, 32).is_none());
        assert!(pick_tag(192, 64).is_none());
    }

    #[test]
    fn oversize_rejected() -> Result<()> {
        let p = Packet::new("N0CALL", "APZ001", &[], vec![b'x'; 222]);
        let frame = encode_frame(&p)?;
        assert_eq!(frame.len(), 240);
        assert!(encode_fx25_frame(&frame, 16).is_err());
        assert!(encode_fx25_frame(&frame[..239], 16).is_ok());
        Ok(())
    }

    #[test]
    fn bad_check_count() {
        assert!(encode_fx25_frame(&[0u8; 20], 24).is_err());
    }

    #[test]
    fn decode_roundtrip() -> Result<()> {
        let frame = encode_frame(&s3_packet())?;
        let block = encode_fx25_frame(&frame, 0)?;
        let (decoded, corrected) = decode_fx25_frame(&block)?;
        assert_eq!(corrected, 0);
        assert_eq!(decoded.to_packet().to_string(), s3_packet().to_string());
        Ok(())
    }

    #[test]
    fn decode_with_errors() -> Result<()> {
        use rand::prelude::*;
        let mut rng = StdRng::seed_from_u64(99);
        for check in [16usize, 32, 64] {
            let frame = encode_frame(&s3_packet())?;
            let clean = encode_fx25_frame(&frame, check)?;
            for nerr in [1, check / 4, check / 2] {
                let mut block = clean.clone();
                // Errors go in the RS block; the tag itself is not
                // protected.
                let positions =
                    rand::seq::index::sample(&mut rng, block.len() - 8, nerr).into_vec();
                for p in positions {
                    block[8 + p] ^= rng.random_range(1..=255) as u8;
                }
                let (decoded, corrected) = decode_fx25_frame(&block)?;
                assert_eq!(corrected, nerr, "check={check}");
                assert_eq!(decoded.to_packet().to_string(), s3_packet().to_string());
            }
        }
        Ok(())
    }

    #[test]
    fn decode_junk() {
        assert!(decode_fx25_frame(&[0u8; 4]).is_err());
        assert!(decode_fx25_frame(&[0u8; 90]).is_err());
        let mut block = [0u8; 20];
        block[..8].copy_from_slice(&TAGS[2].tag.to_le_bytes());
        assert!(decode_fx25_frame(&block).is_err());
    }
}
