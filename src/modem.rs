/*! Modem driver: packet in, audio out.

The [`Modem`] binds three capabilities together: an [`AudioSink`] for
rendered samples, a [`Modulator`](crate::modulator::Modulator) turning
bits into samples, and a
[`BitstreamConverter`](crate::framer::BitstreamConverter) turning
packets into bits. An optional [`PttControl`] keys the transmitter
around each burst.

`transmit` renders the whole burst up front (leading silence, modulated
bits with gain, trailing silence), hands it to any render observers,
writes it to the sink, and blocks until the sink reports completion.
Whatever goes wrong, the PTT line is released before the error
propagates; leaving a transmitter keyed is the one failure mode this
layer must never have.
*/
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::ax25::Packet;
use crate::framer::BitstreamConverter;
use crate::modulator::Modulator;
use crate::{Error, Float, Result};

/// Audio sample sink capability. Sound card render streams, `.au`
/// files, and test buffers implement this.
pub trait AudioSink: Send {
    /// Write samples, returning how many were accepted.
    fn write(&mut self, samples: &[Float]) -> Result<usize>;

    /// Block until previously written samples have been played out (or
    /// flushed). Negative timeout means wait forever. Returns false on
    /// timeout.
    fn wait_write_completed(&mut self, timeout_ms: i32) -> Result<bool> {
        let _ = timeout_ms;
        Ok(true)
    }

    /// Sink sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Channel count; this crate only produces mono.
    fn channels(&self) -> u16 {
        1
    }
}

/// Audio sample source capability, for capture streams and files.
pub trait AudioSource: Send {
    /// Read up to `buf.len()` samples, returning how many were read.
    /// Zero means end of stream.
    fn read(&mut self, buf: &mut [Float]) -> Result<usize>;

    /// Source sample rate in Hz.
    fn sample_rate(&self) -> u32;
}

/// Push-to-talk capability: the transmitter key line.
pub trait PttControl: Send {
    /// Key or unkey the transmitter.
    fn set_ptt(&mut self, enable: bool) -> Result<()>;

    /// Current key state.
    fn ptt(&self) -> Result<bool>;
}

/// Render observer: sees each rendered burst by reference before it
/// reaches the sink. Audio file loggers hang off this.
pub type RenderObserver = Box<dyn FnMut(&[Float]) + Send>;

/// In-memory audio sink. Clones share the same buffer, so keep a clone
/// around to inspect what the modem rendered.
#[derive(Clone)]
pub struct VectorSink {
    samples: Arc<Mutex<Vec<Float>>>,
    sample_rate: u32,
}

impl VectorSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            sample_rate,
        }
    }

    /// Snapshot of everything written so far.
    #[must_use]
    pub fn samples(&self) -> Vec<Float> {
        self.samples.lock().unwrap().clone()
    }
}

impl AudioSink for VectorSink {
    fn write(&mut self, samples: &[Float]) -> Result<usize> {
        self.samples.lock().unwrap().extend_from_slice(samples);
        Ok(samples.len())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// The modem driver.
pub struct Modem {
    sink: Option<Box<dyn AudioSink>>,
    modulator: Option<Box<dyn Modulator>>,
    converter: BitstreamConverter,
    ptt: Option<Box<dyn PttControl>>,
    observers: Vec<RenderObserver>,
    baud_rate: u32,
    tx_delay_ms: u32,
    tx_tail_ms: u32,
    start_silence: f64,
    end_silence: f64,
    gain: f64,
}

impl Default for Modem {
    fn default() -> Self {
        Self::new()
    }
}

impl Modem {
    /// New modem with Bell 202 defaults and no bound dependencies.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: None,
            modulator: None,
            converter: BitstreamConverter::Basic,
            ptt: None,
            observers: Vec::new(),
            baud_rate: 1200,
            tx_delay_ms: 300,
            tx_tail_ms: 45,
            start_silence: 0.0,
            end_silence: 0.0,
            gain: 1.0,
        }
    }

    /// Bind sink, modulator and converter. Must happen before
    /// transmitting.
    pub fn initialize(
        &mut self,
        sink: Box<dyn AudioSink>,
        modulator: Box<dyn Modulator>,
        converter: BitstreamConverter,
    ) {
        self.sink = Some(sink);
        self.modulator = Some(modulator);
        self.converter = converter;
    }

    /// Bind a PTT line, keyed around each transmission.
    pub fn set_ptt_control(&mut self, ptt: Box<dyn PttControl>) {
        self.ptt = Some(ptt);
    }

    /// Add a render observer.
    pub fn add_render_observer(&mut self, observer: RenderObserver) {
        self.observers.push(observer);
    }

    /// Set the baud rate, used to convert delay times to flag counts.
    pub fn set_baud_rate(&mut self, baud: u32) {
        self.baud_rate = baud;
    }

    /// Preamble length in milliseconds (TNC TXDELAY convention).
    pub fn set_tx_delay_ms(&mut self, ms: u32) {
        self.tx_delay_ms = ms;
    }

    /// Postamble length in milliseconds.
    pub fn set_tx_tail_ms(&mut self, ms: u32) {
        self.tx_tail_ms = ms;
    }

    /// Silence before the burst, seconds.
    pub fn set_start_silence(&mut self, seconds: f64) {
        self.start_silence = seconds;
    }

    /// Silence after the burst, seconds.
    pub fn set_end_silence(&mut self, seconds: f64) {
        self.end_silence = seconds;
    }

    /// Output gain applied after modulation. Keep within 1.0 to keep
    /// the envelope within ±1.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
    }

    fn flags_for_ms(&self, ms: u32) -> usize {
        let flags = (f64::from(self.baud_rate) * f64::from(ms) / 1000.0 / 8.0).round() as usize;
        flags.max(1)
    }

    /// Transmit one packet: encode, modulate, write to the sink.
    pub fn transmit(&mut self, p: &Packet) -> Result<()> {
        let bits = self.converter.encode(
            p,
            self.flags_for_ms(self.tx_delay_ms),
            self.flags_for_ms(self.tx_tail_ms),
        );
        if bits.is_empty() {
            return Err(Error::InvalidInput(format!("packet not encodable: {p}")));
        }
        debug!("Modem: transmitting {} as {} bits", p, bits.len());
        self.transmit_bits(&bits)
    }

    /// Transmit an already framed bit sequence.
    pub fn transmit_bits(&mut self, bits: &[u8]) -> Result<()> {
        if self.sink.is_none() || self.modulator.is_none() {
            return Err(Error::Init("modem not initialized".to_string()));
        }

        if let Some(ptt) = &mut self.ptt {
            ptt.set_ptt(true)?;
        }
        let result = self.render_and_write(bits);
        // Best effort release, also on failure.
        if let Some(ptt) = &mut self.ptt {
            if let Err(e) = ptt.set_ptt(false) {
                warn!("Modem: failed to release PTT: {e}");
            }
        }
        result
    }

    fn render_and_write(&mut self, bits: &[u8]) -> Result<()> {
        let sink = self.sink.as_mut().unwrap();
        let modulator = self.modulator.as_mut().unwrap();
        let rate = sink.sample_rate();
        if rate != modulator.sample_rate() {
            return Err(Error::Init(format!(
                "sink at {} Hz but modulator at {} Hz",
                rate,
                modulator.sample_rate()
            )));
        }

        let lead = (self.start_silence * f64::from(rate)).round() as usize;
        let tail = (self.end_silence * f64::from(rate)).round() as usize;
        let mut buffer = Vec::with_capacity(lead + tail + bits.len() * 64);
        buffer.resize(lead, 0.0);
        for &bit in bits {
            for _ in 0..modulator.next_samples_per_bit() {
                buffer.push(modulator.modulate(bit) * self.gain);
            }
        }
        buffer.resize(buffer.len() + tail, 0.0);

        for observer in &mut self.observers {
            observer(&buffer);
        }

        let mut written = 0;
        while written < buffer.len() {
            let n = sink.write(&buffer[written..])?;
            if n == 0 {
                return Err(Error::Audio("sink accepted no samples".to_string()));
            }
            written += n;
        }
        sink.wait_write_completed(-1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulator::DdsAfskModulator;
    use anyhow::Result;

    struct MockPtt {
        log: Arc<Mutex<Vec<bool>>>,
    }

    impl PttControl for MockPtt {
        fn set_ptt(&mut self, enable: bool) -> Result<(), Error> {
            self.log.lock().unwrap().push(enable);
            Ok(())
        }
        fn ptt(&self) -> Result<bool, Error> {
            Ok(*self.log.lock().unwrap().last().unwrap_or(&false))
        }
    }

    struct FailingSink;

    impl AudioSink for FailingSink {
        fn write(&mut self, _samples: &[Float]) -> Result<usize, Error> {
            Err(Error::Audio("device unplugged".to_string()))
        }
        fn sample_rate(&self) -> u32 {
            48000
        }
    }

    fn packet() -> Packet {
        Packet::new("N0CALL-10", "APZ001", &["WIDE1-1"], "Hello, APRS!")
    }

    fn test_modem(sink: Box<dyn AudioSink>) -> Modem {
        let mut m = Modem::new();
        m.set_baud_rate(1200);
        m.set_tx_delay_ms(100);
        m.set_tx_tail_ms(20);
        m.set_gain(0.3);
        m.initialize(
            sink,
            Box::new(DdsAfskModulator::new(1200.0, 2200.0, 1200, 9600, 1.0)),
            BitstreamConverter::Basic,
        );
        m
    }

    #[test]
    fn transmit_renders_burst() -> Result<()> {
        let sink = VectorSink::new(9600);
        let tap = sink.clone();
        let mut m = test_modem(Box::new(sink));
        m.set_start_silence(0.1);
        m.set_end_silence(0.05);
        m.transmit(&packet())?;

        let samples = tap.samples();
        // 100ms tx_delay at 1200 Bd is 15 flags, 20ms tail is 3.
        let bits = BitstreamConverter::Basic.encode(&packet(), 15, 3);
        let expect = 960 + bits.len() * 8 + 480;
        assert_eq!(samples.len(), expect);
        assert!(samples[..960].iter().all(|s| *s == 0.0));
        assert!(samples[samples.len() - 480..].iter().all(|s| *s == 0.0));
        let peak = samples.iter().fold(0.0f64, |a, s| a.max(s.abs()));
        assert!(peak <= 0.3 + 1e-9);
        assert!(peak > 0.29);
        Ok(())
    }

    #[test]
    fn ptt_keyed_around_burst() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = VectorSink::new(9600);
        let mut m = test_modem(Box::new(sink));
        m.set_ptt_control(Box::new(MockPtt { log: log.clone() }));
        m.transmit(&packet())?;
        assert_eq!(*log.lock().unwrap(), vec![true, false]);
        Ok(())
    }

    #[test]
    fn sink_fault_releases_ptt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut m = test_modem(Box::new(FailingSink));
        m.set_ptt_control(Box::new(MockPtt { log: log.clone() }));
        assert!(matches!(m.transmit(&packet()), Err(Error::Audio(_))));
        assert_eq!(*log.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn uninitialized_is_contract_error() {
        let mut m = Modem::new();
        assert!(matches!(m.transmit(&packet()), Err(Error::Init(_))));
    }

    #[test]
    fn sample_rate_mismatch_is_contract_error() {
        let mut m = Modem::new();
        m.initialize(
            Box::new(VectorSink::new(48000)),
            Box::new(DdsAfskModulator::new(1200.0, 2200.0, 1200, 44100, 1.0)),
            BitstreamConverter::Basic,
        );
        assert!(matches!(m.transmit(&packet()), Err(Error::Init(_))));
    }

    #[test]
    fn unencodable_packet_rejected() {
        let sink = VectorSink::new(9600);
        let mut m = test_modem(Box::new(sink));
        let bad = Packet::new("N0CALL-77", "APZ001", &[], "x");
        assert!(matches!(m.transmit(&bad), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn render_observer_sees_burst() -> Result<()> {
        let seen = Arc::new(Mutex::new(0usize));
        let seen2 = seen.clone();
        let sink = VectorSink::new(9600);
        let tap = sink.clone();
        let mut m = test_modem(Box::new(sink));
        m.add_render_observer(Box::new(move |samples| {
            *seen2.lock().unwrap() = samples.len();
        }));
        m.transmit(&packet())?;
        assert_eq!(*seen.lock().unwrap(), tap.samples().len());
        Ok(())
    }
}
