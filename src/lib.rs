#![warn(missing_docs)]
/*! This crate implements a software modem for [AX.25][ax25] and
[FX.25][fx25], the packet radio link layer used by [APRS][aprs].

It converts packets into a modulated audio bitstream (transmit path),
and recovers packets from a received bitstream (receive path),
coordinating audio output, PTT control, and byte transports speaking
[KISS][kiss].

# Architecture overview

The transmit path is a chain of small components:

```text
[ Packet ]
     ↓
[ AX.25 frame codec ]           (optionally wrapped in an FX.25
     ↓                           Reed-Solomon block)
[ HDLC bitstream encoder ]      flags, bit stuffing, NRZI
     ↓
[ DDS AFSK modulator ]          phase continuous mark/space tones
     ↓
[ Audio sink ]                  sound card, .au file, …
```

The receive path runs the other way: a byte transport delivers KISS
frames from clients, or a discriminator delivers sliced bits which the
streaming [`deframer`] turns back into frames.

A [`data_stream::ModemDataStream`] ties the two together: one worker
thread polls the transport for inbound packets, queues them, and drives
the modem, with bounded queues and clean shutdown.

External dependencies are capability traits: [`modem::AudioSink`],
[`modem::PttControl`], [`data_stream::Transport`],
[`data_stream::Formatter`]. Sound card drivers, serial ports and TCP
servers live outside this crate and implement those traits.

# Example

Encode a packet to a modulated audio burst:

```
use rustmodem::ax25::Packet;
use rustmodem::framer::BitstreamConverter;
use rustmodem::modem::{Modem, VectorSink};
use rustmodem::modulator::DdsAfskModulator;

let packet: Packet = "N0CALL-10>APZ001,WIDE1-1:Hello, APRS!".parse()?;
let mut modem = Modem::new();
modem.set_baud_rate(1200);
modem.set_tx_delay_ms(300);
modem.set_tx_tail_ms(45);
modem.set_gain(0.3);
modem.initialize(
    Box::new(VectorSink::new(48000)),
    Box::new(DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 1.0)),
    BitstreamConverter::Basic,
);
modem.transmit(&packet)?;
# Ok::<(), rustmodem::Error>(())
```

[ax25]: https://en.wikipedia.org/wiki/AX.25
[fx25]: https://en.wikipedia.org/wiki/FX.25_Forward_Error_Correction
[aprs]: https://en.wikipedia.org/wiki/Automatic_Packet_Reporting_System
[kiss]: https://en.wikipedia.org/wiki/KISS_(amateur_radio_protocol)
*/

pub mod ax25;
pub mod crc;
pub mod hdlc;
pub mod kiss;

pub mod fx25;
pub mod reed_solomon;

pub mod deframer;
pub mod framer;

pub mod modem;
pub mod modulator;

pub mod au;
pub mod data_stream;

/// Audio sample type. The modulator works in f64 to keep phase error
/// negligible over long transmissions.
pub type Float = f64;

/// Crate error type.
///
/// Decoder surfaces (deframer, KISS decoder) never return errors:
/// corrupt input is dropped and hunting resumes. Errors are for invalid
/// caller input, I/O trouble, and contract violations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed caller input: bad address string, packet too large for
    /// FX.25, and similar. No side effects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A Reed-Solomon block with more errors than the code can correct.
    #[error("uncorrectable FEC block: {0}")]
    Fec(String),

    /// I/O error from a sink, source, or transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hard fault while rendering or writing audio.
    #[error("audio fault: {0}")]
    Audio(String),

    /// Programming contract violation: double start, or using a
    /// component before binding its dependencies.
    #[error("initialization error: {0}")]
    Init(String),
}

/// Crate result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
