/*! Transmit bitstream encoders.

Turns a packet into the exact bit sequence that goes to the modulator:
HDLC preamble flags, the frame LSB first with bit stuffing, postamble
flags, everything NRZI coded. One bit per output byte, value 0 or 1.

The FX.25 variant wraps the flag delimited frame in a Reed-Solomon
block first; nothing inside that block is stuffed, so a receiver
without FX.25 support still sees a plain AX.25 frame between the
flags and decodes it, check bytes trailing behind as noise.
*/
use log::debug;

use crate::ax25::{Packet, encode_frame};
use crate::fx25::encode_fx25_frame;
use crate::hdlc::{FLAG, add_flags, bit_stuff, bytes_to_bits, nrzi_encode};

/// Encode a packet as a plain AX.25 HDLC bitstream.
///
/// `tx_delay` and `tx_tail` are flag counts for the preamble and
/// postamble. Returns an empty vector for a packet that cannot be
/// encoded.
#[must_use]
pub fn encode_basic_bitstream(p: &Packet, tx_delay: usize, tx_tail: usize) -> Vec<u8> {
    let frame = match encode_frame(p) {
        Ok(f) => f,
        Err(e) => {
            debug!("not encodable as AX.25: {e}");
            return Vec::new();
        }
    };
    let stuffed = bit_stuff(&bytes_to_bits(&frame));
    let mut bits = Vec::with_capacity(stuffed.len() + 8 * (tx_delay + tx_tail));
    add_flags(&mut bits, tx_delay);
    bits.extend_from_slice(&stuffed);
    add_flags(&mut bits, tx_tail);
    nrzi_encode(&mut bits);
    bits
}

/// Encode a packet as an FX.25 protected bitstream.
///
/// The frame, wrapped in one flag on each side, becomes the data area
/// of a Reed-Solomon block with `check` check bytes (0 selects the
/// default 16). Packets too large for any block geometry return an
/// empty vector.
#[must_use]
pub fn encode_fx25_bitstream(p: &Packet, tx_delay: usize, tx_tail: usize, check: usize) -> Vec<u8> {
    let frame = match encode_frame(p) {
        Ok(f) => f,
        Err(e) => {
            debug!("not encodable as AX.25: {e}");
            return Vec::new();
        }
    };
    let mut content = Vec::with_capacity(frame.len() + 2);
    content.push(FLAG);
    content.extend_from_slice(&frame);
    content.push(FLAG);
    let block = match encode_fx25_frame(&content, check) {
        Ok(b) => b,
        Err(e) => {
            debug!("not encodable as FX.25: {e}");
            return Vec::new();
        }
    };
    let mut bits = Vec::with_capacity(8 * (block.len() + tx_delay + tx_tail));
    add_flags(&mut bits, tx_delay);
    bits.extend_from_slice(&bytes_to_bits(&block));
    add_flags(&mut bits, tx_tail);
    nrzi_encode(&mut bits);
    bits
}

/// The two transmit framings, as a closed set.
///
/// The modem holds one of these; both obey the same
/// `encode(packet, tx_delay, tx_tail)` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamConverter {
    /// Plain AX.25.
    Basic,
    /// FX.25 with the given number of check bytes (0 = default 16).
    Fx25 {
        /// Check byte count: 16, 32 or 64.
        check: usize,
    },
}

impl BitstreamConverter {
    /// Encode a packet to a fully framed bit sequence.
    #[must_use]
    pub fn encode(&self, p: &Packet, tx_delay: usize, tx_tail: usize) -> Vec<u8> {
        match self {
            BitstreamConverter::Basic => encode_basic_bitstream(p, tx_delay, tx_tail),
            BitstreamConverter::Fx25 { check } => {
                encode_fx25_bitstream(p, tx_delay, tx_tail, *check)
            }
        }
    }
}
