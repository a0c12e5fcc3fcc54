// Audio input handling
//
// Raw PCM bytes or WAV data are decoded into a mono f32 buffer at the
// model's sample rate, then cut into overlapping chunks by the chunker.

pub mod chunker;

use std::io::Read;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use chunker::{AudioChunk, Chunker};
use crate::error::{Result, JimakuError};

/// PCM sample encodings accepted on the raw byte input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    S16Le,
    /// Signed 32-bit little endian
    S32Le,
    /// IEEE float 32-bit little endian
    F32Le,
}

impl SampleFormat {
    /// Map a bit depth / float flag pair to a supported format
    pub fn from_bits(bits_per_sample: u16, is_float: bool) -> Result<Self> {
        match (bits_per_sample, is_float) {
            (16, false) => Ok(Self::S16Le),
            (32, false) => Ok(Self::S32Le),
            (32, true) => Ok(Self::F32Le),
            _ => Err(JimakuError::InvalidAudio(format!(
                "unsupported sample format: {} bits, float={}",
                bits_per_sample, is_float
            ))),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::S32Le | Self::F32Le => 4,
        }
    }
}

/// Description of a raw audio byte stream supplied by the ingestion layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// Interleaved PCM bytes plus their metadata
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub metadata: AudioMetadata,
    pub bytes: Vec<u8>,
}

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioInput {
    pub fn new(bytes: Vec<u8>, metadata: AudioMetadata) -> Self {
        Self { metadata, bytes }
    }

    /// Decode interleaved PCM into a mono buffer, averaging channels
    pub fn decode(&self) -> Result<AudioBuffer> {
        let AudioMetadata { sample_rate, channels, format } = self.metadata;

        if self.bytes.is_empty() {
            return Err(JimakuError::InvalidAudio("audio stream is empty".to_string()));
        }
        if sample_rate == 0 || channels == 0 {
            return Err(JimakuError::InvalidAudio(format!(
                "invalid stream parameters: {} Hz, {} channels",
                sample_rate, channels
            )));
        }

        let frame_size = format.bytes_per_sample() * channels as usize;
        if self.bytes.len() % frame_size != 0 {
            return Err(JimakuError::InvalidAudio(format!(
                "stream length {} is not a multiple of the {}-byte frame size",
                self.bytes.len(),
                frame_size
            )));
        }

        let width = format.bytes_per_sample();
        let interleaved: Vec<f32> = self.bytes
            .chunks_exact(width)
            .map(|b| match format {
                SampleFormat::S16Le => i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0,
                SampleFormat::S32Le => {
                    i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0
                }
                SampleFormat::F32Le => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            })
            .collect();

        let samples = downmix(&interleaved, channels);
        debug!("Decoded {} frames at {} Hz", samples.len(), sample_rate);

        Ok(AudioBuffer { samples, sample_rate })
    }
}

impl AudioBuffer {
    /// Parse WAV data from any reader
    pub fn from_wav_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav = hound::WavReader::new(reader)
            .map_err(|e| JimakuError::InvalidAudio(format!("failed to parse WAV data: {}", e)))?;
        let spec = wav.spec();

        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(JimakuError::InvalidAudio("WAV header has no channels or sample rate".to_string()));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(JimakuError::InvalidAudio(format!(
                        "unsupported WAV bit depth {}",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                wav.samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        if interleaved.is_empty() {
            return Err(JimakuError::InvalidAudio("WAV file contains no samples".to_string()));
        }

        Ok(Self {
            samples: downmix(&interleaved, spec.channels),
            sample_rate: spec.sample_rate,
        })
    }

    pub fn from_wav_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| JimakuError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_wav_reader(std::io::BufReader::new(file))
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Linear-interpolation resample; returns self unchanged when rates match
    /// or either rate is zero
    pub fn resample(self, target_rate: u32) -> Self {
        let degenerate = self.sample_rate == 0 || target_rate == 0 || self.samples.is_empty();
        if degenerate || self.sample_rate == target_rate {
            return self;
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).round().max(1.0) as usize;
        let last = self.samples.len() - 1;

        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos.floor() as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = (pos - idx as f64) as f32;
                self.samples[idx] * (1.0 - frac) + self.samples[next] * frac
            })
            .collect();

        Self { samples, sample_rate: target_rate }
    }
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
