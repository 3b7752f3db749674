/*! DDS AFSK modulator.

[AFSK][afsk] sends bits as two audio tones: mark (1200 Hz for Bell
202) for a one, space (2200 Hz) for a zero. The modulator is a
[DDS][dds] phase accumulator: every sample advances the phase by
2π·f/SR for the currently selected tone and outputs its sine, so the
waveform stays phase continuous across tone changes. A discontinuity
would splatter energy across the band and cost decodes.

The sample rate rarely divides evenly by the baud rate (44100/1200 =
36.75). [`Modulator::next_samples_per_bit`] schedules 36- and
37-sample bits so that the cumulative sample count never drifts more
than one sample from the ideal bit clock.

[afsk]: https://en.wikipedia.org/wiki/Frequency-shift_keying#Audio_frequency-shift_keying
[dds]: https://en.wikipedia.org/wiki/Direct_digital_synthesis
*/
use crate::Float;

const TAU: f64 = 2.0 * std::f64::consts::PI;

/// Per-bit sample generator capability.
///
/// The driving loop asks how many samples the current bit takes, then
/// calls [`Modulator::modulate`] exactly that many times. Asking again
/// mid-bit returns the same count.
pub trait Modulator: Send {
    /// Sample count for the current bit.
    fn next_samples_per_bit(&self) -> usize;

    /// Produce the next sample for `bit` (nonzero = mark).
    fn modulate(&mut self, bit: u8) -> Float;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;
}

/// AFSK modulator with direct digital synthesis.
///
/// `gamma` is the phase continuity factor: 1.0 keeps one coherent
/// phase accumulator across tone switches, which is what every real
/// deployment wants. Lower values cross-fade toward free-running
/// per-tone oscillators, kept for experiments with receivers that
/// track each tone independently.
pub struct DdsAfskModulator {
    mark_step: f64,
    space_step: f64,
    sample_rate: u32,
    samples_per_bit: f64,
    gamma: f64,
    phase: f64,
    mark_phase: f64,
    space_phase: f64,
    bit_index: u64,
    samples_into_bit: usize,
}

impl DdsAfskModulator {
    /// Create a modulator. Bell 202 is
    /// `DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 1.0)`.
    #[must_use]
    pub fn new(mark_hz: f64, space_hz: f64, baud: u32, sample_rate: u32, gamma: f64) -> Self {
        let sr = f64::from(sample_rate);
        Self {
            mark_step: TAU * mark_hz / sr,
            space_step: TAU * space_hz / sr,
            sample_rate,
            samples_per_bit: sr / f64::from(baud),
            gamma: gamma.clamp(0.0, 1.0),
            phase: 0.0,
            mark_phase: 0.0,
            space_phase: 0.0,
            bit_index: 0,
            samples_into_bit: 0,
        }
    }

    fn bit_len(&self, bit: u64) -> usize {
        let end = ((bit + 1) as f64 * self.samples_per_bit).round() as u64;
        let start = (bit as f64 * self.samples_per_bit).round() as u64;
        (end - start) as usize
    }
}

impl Modulator for DdsAfskModulator {
    fn next_samples_per_bit(&self) -> usize {
        self.bit_len(self.bit_index)
    }

    fn modulate(&mut self, bit: u8) -> Float {
        let step = if bit != 0 { self.mark_step } else { self.space_step };
        self.phase = (self.phase + step) % TAU;
        self.mark_phase = (self.mark_phase + self.mark_step) % TAU;
        self.space_phase = (self.space_phase + self.space_step) % TAU;

        let sample = if self.gamma >= 1.0 {
            self.phase.sin()
        } else {
            let tone = if bit != 0 { self.mark_phase } else { self.space_phase };
            self.gamma * self.phase.sin() + (1.0 - self.gamma) * tone.sin()
        };

        self.samples_into_bit += 1;
        if self.samples_into_bit >= self.bit_len(self.bit_index) {
            self.samples_into_bit = 0;
            self.bit_index += 1;
        }
        sample
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(modulator: &mut DdsAfskModulator, bits: &[u8]) -> Vec<Float> {
        let mut out = Vec::new();
        for &bit in bits {
            for _ in 0..modulator.next_samples_per_bit() {
                out.push(modulator.modulate(bit));
            }
        }
        out
    }

    fn random_bits(n: usize) -> Vec<u8> {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..n).map(|_| rng.random_range(0..=1)).collect()
    }

    #[test]
    fn samples_per_bit_integer_ratio() {
        // 48000/1200 divides evenly; the count is constant, also when
        // asked again mid-bit.
        let mut m = DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 1.0);
        let bits = random_bits(200);
        let mut total = 0usize;
        for &bit in &bits {
            assert_eq!(m.next_samples_per_bit(), 40);
            for _ in 0..m.next_samples_per_bit() {
                assert_eq!(m.next_samples_per_bit(), 40);
                m.modulate(bit);
                total += 1;
            }
        }
        assert_eq!(total, bits.len() * 40);
    }

    #[test]
    fn samples_per_bit_fractional_ratio() {
        // 44100/1200 = 36.75: bits are 36 or 37 samples, and the
        // average tracks the exact baud rate.
        let mut m = DdsAfskModulator::new(1200.0, 2200.0, 1200, 44100, 1.0);
        let bits = random_bits(4000);
        let mut counts = Vec::new();
        let mut total = 0usize;
        for &bit in &bits {
            let n = m.next_samples_per_bit();
            assert!(n == 36 || n == 37, "unexpected samples per bit {n}");
            counts.push(n);
            for _ in 0..n {
                m.modulate(bit);
            }
            total += n;
        }
        assert_eq!(*counts.iter().min().unwrap(), 36);
        assert_eq!(*counts.iter().max().unwrap(), 37);

        let ideal = bits.len() as f64 * 44100.0 / 1200.0;
        assert!((total as f64 - ideal).abs() <= 1.0);
        let effective_baud = bits.len() as f64 * 44100.0 / total as f64;
        assert!((effective_baud - 1200.0).abs() < 0.1);
    }

    #[test]
    fn phase_continuity() {
        let mut m = DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 1.0);
        let audio = render(&mut m, &random_bits(10000));
        // Max change per sample for a continuous 2200 Hz tone at 48k
        // is 2π·2200/48000 ≈ 0.288. A discontinuity would show up as a
        // jump toward 2.0.
        let max_step = TAU * 2200.0 / 48000.0 + 1e-6;
        for pair in audio.windows(2) {
            assert!((pair[1] - pair[0]).abs() < max_step);
        }
    }

    #[test]
    fn dc_offset() {
        let mut m = DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 1.0);
        let bits: Vec<u8> = (0..10000).map(|i| (i % 2) as u8).collect();
        let audio = render(&mut m, &bits);
        let mean = audio.iter().sum::<f64>() / audio.len() as f64;
        assert!(mean.abs() < 0.01, "DC offset {mean}");
    }

    #[test]
    fn constant_envelope() {
        let mut m = DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 1.0);
        let audio = render(&mut m, &random_bits(10000));
        let max = audio.iter().cloned().fold(f64::MIN, f64::max);
        let min = audio.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max <= 1.0 && max > 0.99, "max {max}");
        assert!(min >= -1.0 && min < -0.99, "min {min}");
    }

    #[test]
    fn cross_faded_envelope_bounded() {
        let mut m = DdsAfskModulator::new(1200.0, 2200.0, 1200, 48000, 0.5);
        let audio = render(&mut m, &random_bits(2000));
        for s in audio {
            assert!(s.abs() <= 1.0);
        }
    }
}
