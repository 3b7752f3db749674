/*! Streaming HDLC deframer.

Consumes an NRZI coded bit stream one bit at a time and emits AX.25
frames: hunt for a `0x7e` flag, collect un-stuffed bits, close the
frame on the next flag, gate on the FCS. At most one frame completes
per consumed bit.

A single flag may serve as the postamble of one frame and the preamble
of the next, so after closing a frame the machine stays synced rather
than re-hunting. Seven consecutive ones are an abort: the partial
frame is discarded.

With diagnostics enabled the decoder reports, for every completed
frame, the 1-based offsets of the opening flag's first bit and the
closing flag's last bit, plus the NRZI line level just before the
opening flag. Replaying that bit slice into a fresh deframer with
[`Deframer::set_last_nrzi_level`] re-decodes the identical frame,
which is what makes captured streams debuggable after the fact.
*/
use log::{debug, info, trace};

use crate::ax25::{Frame, MIN_FRAME_LEN, decode_frame};
use crate::hdlc::bits_to_bytes;

// Collecting more than this without a closing flag means we are not
// looking at a frame. AX.25 tops out far below it.
const MAX_FRAME_BITS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Looking for a flag pattern.
    Hunt,
    /// Flag seen; accumulating un-stuffed frame bits.
    Frame,
}

/// Streaming bit-level decoder state machine.
pub struct Deframer {
    state: State,
    /// Last eight NRZI-decoded bits, oldest in bit 0.
    window: u8,
    /// Last nine raw input bits, newest in bit 0.
    raw_history: u16,
    last_nrzi_level: u8,
    ones: u32,
    bits: Vec<u8>,
    /// 1-based count of consumed input bits.
    pos: u64,
    complete: bool,
    frame: Option<Frame>,

    enable_diagnostics: bool,
    // Opening flag position and prior line level of the frame being
    // collected.
    cur_start: u64,
    cur_level: u8,
    frame_start: Option<u64>,
    frame_end: Option<u64>,
    frame_nrzi_level: u8,

    decoded: usize,
    crc_errors: usize,
    aborts: usize,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Deframer {
    fn drop(&mut self) {
        info!(
            "Deframer: decoded {}, CRC errors {}, aborts {}",
            self.decoded, self.crc_errors, self.aborts
        );
    }
}

impl Deframer {
    /// Create a deframer hunting for its first flag, NRZI level 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Hunt,
            window: 0xff,
            raw_history: 0,
            last_nrzi_level: 0,
            ones: 0,
            bits: Vec::new(),
            pos: 0,
            complete: false,
            frame: None,
            enable_diagnostics: false,
            cur_start: 0,
            cur_level: 0,
            frame_start: None,
            frame_end: None,
            frame_nrzi_level: 0,
            decoded: 0,
            crc_errors: 0,
            aborts: 0,
        }
    }

    /// Turn on frame position diagnostics.
    pub fn enable_diagnostics(&mut self, enable: bool) {
        self.enable_diagnostics = enable;
    }

    /// Preset the NRZI line level, for replaying a captured slice.
    pub fn set_last_nrzi_level(&mut self, level: u8) {
        self.last_nrzi_level = level & 1;
    }

    /// Current NRZI line level.
    #[must_use]
    pub fn last_nrzi_level(&self) -> u8 {
        self.last_nrzi_level
    }

    /// Whether the last consumed bit completed a frame.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.complete
    }

    /// The most recently decoded frame.
    #[must_use]
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// 1-based offset of the last frame's opening flag first bit.
    /// Diagnostics only.
    #[must_use]
    pub fn frame_start(&self) -> Option<u64> {
        self.frame_start
    }

    /// 1-based offset of the last frame's closing flag last bit.
    /// Diagnostics only.
    #[must_use]
    pub fn frame_end(&self) -> Option<u64> {
        self.frame_end
    }

    /// NRZI line level just before the last frame's opening flag.
    #[must_use]
    pub fn frame_nrzi_level(&self) -> u8 {
        self.frame_nrzi_level
    }

    /// Frames decoded so far.
    #[must_use]
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    /// Feed one NRZI coded bit. Returns a frame when this bit
    /// completed one.
    pub fn push_bit(&mut self, raw: u8) -> Option<Frame> {
        let raw = raw & 1;
        self.pos += 1;
        self.complete = false;
        let bit = 1 ^ raw ^ self.last_nrzi_level;
        self.last_nrzi_level = raw;
        self.raw_history = ((self.raw_history << 1) | u16::from(raw)) & 0x1ff;

        match self.state {
            State::Hunt => {
                self.window = (self.window >> 1) | (bit << 7);
                if self.window == 0x7e {
                    trace!("Deframer: found flag at bit {}", self.pos);
                    self.enter_frame();
                }
                None
            }
            State::Frame => {
                if bit == 1 {
                    self.ones += 1;
                    self.bits.push(1);
                    if self.ones >= 7 || self.bits.len() > MAX_FRAME_BITS {
                        trace!("Deframer: abort at bit {}", self.pos);
                        self.aborts += 1;
                        self.abort();
                    }
                    None
                } else if self.ones == 5 {
                    // Stuffed zero.
                    self.ones = 0;
                    None
                } else if self.ones == 6 {
                    // Closing flag.
                    let frame = self.close_frame();
                    self.enter_frame();
                    frame
                } else {
                    self.ones = 0;
                    self.bits.push(0);
                    if self.bits.len() > MAX_FRAME_BITS {
                        self.aborts += 1;
                        self.abort();
                    }
                    None
                }
            }
        }
    }

    /// Feed a bit buffer starting at `offset`. Returns the first
    /// completed frame, if any, and the number of bits consumed
    /// (everything up to and including the frame's closing bit, or
    /// the whole rest of the buffer). Callers wanting every frame
    /// re-invoke with the advanced offset until 0 bits are consumed.
    pub fn decode(&mut self, bits: &[u8], offset: usize) -> (Option<Frame>, usize) {
        let mut read = 0;
        for &b in bits.iter().skip(offset) {
            read += 1;
            if let Some(frame) = self.push_bit(b) {
                return (Some(frame), read);
            }
        }
        (None, read)
    }

    // A flag just completed at self.pos; start collecting the next
    // frame. That same flag is the next frame's preamble.
    fn enter_frame(&mut self) {
        self.state = State::Frame;
        self.bits.clear();
        self.ones = 0;
        self.cur_start = self.pos.saturating_sub(7);
        self.cur_level = ((self.raw_history >> 8) & 1) as u8;
    }

    fn abort(&mut self) {
        self.state = State::Hunt;
        self.window = 0xff;
        self.bits.clear();
        self.ones = 0;
    }

    // The accumulated bits end with the closing flag's first seven
    // bits (0 and six ones); everything before them is the frame.
    fn close_frame(&mut self) -> Option<Frame> {
        let len = self.bits.len().saturating_sub(7);
        self.bits.truncate(len);

        if !len.is_multiple_of(8) {
            trace!("Deframer: frame length {len} bits not byte aligned");
            return None;
        }
        if len / 8 < MIN_FRAME_LEN {
            trace!("Deframer: frame too short: {} bytes", len / 8);
            return None;
        }
        let bytes = bits_to_bytes(&self.bits);
        match decode_frame(&bytes) {
            Some(frame) => {
                debug!("Deframer: decoded frame: {}", frame.to_packet());
                self.decoded += 1;
                self.complete = true;
                if self.enable_diagnostics {
                    self.frame_start = Some(self.cur_start);
                    self.frame_end = Some(self.pos);
                }
                self.frame_nrzi_level = self.cur_level;
                self.frame = Some(frame.clone());
                Some(frame)
            }
            None => {
                self.crc_errors += 1;
                debug!("Deframer: dropped corrupt frame of {} bytes", bytes.len());
                None
            }
        }
    }
}
