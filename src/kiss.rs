/*! KISS framing.

[KISS][kiss] is the byte protocol between a host and a TNC: frames are
delimited by `C0`, with `C0`/`DB` inside a frame escaped as `DB DC` and
`DB DD`. The first byte of every frame carries the port number in the
high nibble and a command in the low nibble; command 0 is a data frame
holding an AX.25 frame without its FCS.

[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
*/

/// Frame delimiter.
pub const FEND: u8 = 0xC0;
/// Escape introducer.
pub const FESC: u8 = 0xDB;
/// Escaped FEND.
pub const TFEND: u8 = 0xDC;
/// Escaped FESC.
pub const TFESC: u8 = 0xDD;

/// Data frame command.
pub const CMD_DATA: u8 = 0;

/// One decoded KISS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    /// Port number, high nibble of the first byte.
    pub port: u8,
    /// Command, low nibble of the first byte.
    pub command: u8,
    /// Frame contents after the command byte, unescaped.
    pub data: Vec<u8>,
}

/// Encode one KISS frame.
#[must_use]
pub fn encode(port: u8, command: u8, data: &[u8]) -> Vec<u8> {
    // Add 10% capacity to leave room for escaped bytes.
    let mut out = Vec::with_capacity((3 + data.len()) * 110 / 100);
    out.push(FEND);
    let header = (port << 4) | (command & 0x0f);
    for &b in std::iter::once(&header).chain(data) {
        match b {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            b => out.push(b),
        }
    }
    out.push(FEND);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for an opening FEND.
    Idle,
    /// Inside a frame; `true` means the next byte is escaped.
    Frame(bool),
}

/// Per-byte KISS decoder.
///
/// Feed arbitrary chunks with [`Decoder::decode`]; completed frames
/// collect in [`Decoder::frames`]. The decoder is stateful across
/// calls and belongs to exactly one byte stream; give every client its
/// own.
#[derive(Debug, Clone)]
pub struct Decoder {
    state: State,
    header: Option<u8>,
    data: Vec<u8>,
    frames: Vec<KissFrame>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// New decoder, hunting for a frame boundary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            header: None,
            data: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Consume bytes, collecting any frames they complete.
    pub fn decode(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push_byte(b);
        }
    }

    /// Completed frames, oldest first.
    #[must_use]
    pub fn frames(&self) -> &[KissFrame] {
        &self.frames
    }

    /// Take ownership of the completed frames.
    pub fn take_frames(&mut self) -> Vec<KissFrame> {
        std::mem::take(&mut self.frames)
    }

    /// Discard completed frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    fn push_byte(&mut self, b: u8) {
        match self.state {
            State::Idle => {
                if b == FEND {
                    self.begin_frame();
                }
            }
            State::Frame(true) => match b {
                TFEND => self.push_data(FEND),
                TFESC => self.push_data(FESC),
                // Invalid escape: drop the frame, hunt for the next
                // boundary.
                _ => {
                    log::debug!("KISS: invalid escape {b:#04x}, dropping frame");
                    self.state = State::Idle;
                }
            },
            State::Frame(false) => match b {
                FEND => {
                    self.end_frame();
                    self.begin_frame();
                }
                FESC => self.state = State::Frame(true),
                b => self.push_data(b),
            },
        }
    }

    fn begin_frame(&mut self) {
        self.state = State::Frame(false);
        self.header = None;
        self.data.clear();
    }

    fn push_data(&mut self, b: u8) {
        if self.state == State::Frame(true) {
            self.state = State::Frame(false);
        }
        if self.header.is_none() {
            self.header = Some(b);
        } else {
            self.data.push(b);
        }
    }

    fn end_frame(&mut self) {
        // A FEND pair with nothing between is idle noise, not a frame.
        if let Some(header) = self.header.take() {
            self.frames.push(KissFrame {
                port: header >> 4,
                command: header & 0x0f,
                data: std::mem::take(&mut self.data),
            });
        }
    }
}
