/*! The Au file format as an audio sink and source.

The format is very simple, and is documented on
<https://en.wikipedia.org/wiki/Au_file_format>.

The benefit .au has over .wav is that .au can be written as a stream,
without seeking back to the file header to update data sizes. That
suits a modem logger that appends bursts for as long as the pipeline
runs.

Only 16 bit linear PCM, mono, is implemented.
*/
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::modem::{AudioSink, AudioSource};
use crate::{Error, Float, Result};

const MAGIC: u32 = 0x2e73_6e64; // ".snd"
const HEADER_LEN: u32 = 28;
const ENCODING_PCM16: u32 = 3;

/// Audio sink writing a streamable .au file.
pub struct AuSink<W: Write + Send> {
    w: W,
    sample_rate: u32,
    wrote_header: bool,
}

impl AuSink<BufWriter<std::fs::File>> {
    /// Create (or truncate) a .au file.
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        Ok(Self::new(
            BufWriter::new(std::fs::File::create(path)?),
            sample_rate,
        ))
    }
}

impl<W: Write + Send> AuSink<W> {
    /// Wrap any writer. The header goes out with the first samples.
    pub fn new(w: W, sample_rate: u32) -> Self {
        Self {
            w,
            sample_rate,
            wrote_header: false,
        }
    }

    fn header(&self) -> [u8; HEADER_LEN as usize] {
        let mut v = [0u8; HEADER_LEN as usize];
        v[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        v[4..8].copy_from_slice(&HEADER_LEN.to_be_bytes());
        // Size unknown: all ones.
        v[8..12].copy_from_slice(&0xffff_ffffu32.to_be_bytes());
        v[12..16].copy_from_slice(&ENCODING_PCM16.to_be_bytes());
        v[16..20].copy_from_slice(&self.sample_rate.to_be_bytes());
        v[20..24].copy_from_slice(&1u32.to_be_bytes());
        // Minimum annotation field stays zeroed.
        v
    }
}

impl<W: Write + Send> AudioSink for AuSink<W> {
    fn write(&mut self, samples: &[Float]) -> Result<usize> {
        if !self.wrote_header {
            self.w.write_all(&self.header())?;
            self.wrote_header = true;
        }
        let scale = Float::from(i16::MAX);
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * scale) as i16;
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        self.w.write_all(&bytes)?;
        Ok(samples.len())
    }

    fn wait_write_completed(&mut self, _timeout_ms: i32) -> Result<bool> {
        self.w.flush()?;
        Ok(true)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Audio source reading a PCM16 mono .au file.
pub struct AuSource<R: Read + Send> {
    r: R,
    sample_rate: u32,
}

impl AuSource<BufReader<std::fs::File>> {
    /// Open a .au file and validate its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(std::fs::File::open(path)?))
    }
}

impl<R: Read + Send> AuSource<R> {
    /// Wrap any reader positioned at the start of a .au stream.
    pub fn new(mut r: R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN as usize];
        r.read_exact(&mut header)?;
        let word = |i: usize| u32::from_be_bytes(header[i..i + 4].try_into().unwrap());
        if word(0) != MAGIC {
            return Err(Error::InvalidInput("not a .au file".to_string()));
        }
        if word(12) != ENCODING_PCM16 || word(20) != 1 {
            return Err(Error::InvalidInput(format!(
                "unsupported .au encoding {} / {} channels",
                word(12),
                word(20)
            )));
        }
        let offset = word(4) as usize;
        if offset > HEADER_LEN as usize {
            let mut skip = vec![0u8; offset - HEADER_LEN as usize];
            r.read_exact(&mut skip)?;
        }
        Ok(Self {
            r,
            sample_rate: word(16),
        })
    }
}

impl<R: Read + Send> AudioSource for AuSource<R> {
    fn read(&mut self, buf: &mut [Float]) -> Result<usize> {
        let scale = Float::from(i16::MAX);
        let mut raw = vec![0u8; buf.len() * 2];
        let mut filled = 0;
        // Tolerate short reads from pipes; stop only at EOF.
        while filled < raw.len() {
            let n = self.r.read(&mut raw[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let samples = filled / 2;
        for (out, pair) in buf.iter_mut().zip(raw[..samples * 2].chunks_exact(2)) {
            *out = Float::from(i16::from_be_bytes([pair[0], pair[1]])) / scale;
        }
        Ok(samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
