use tracing::info;

use super::AudioBuffer;
use crate::config::ChunkerConfig;
use crate::error::{Result, JimakuError};

/// A bounded slice of the input audio, transcribed independently
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Position in the chunk sequence
    pub index: usize,
    /// Offset of the first sample in the original audio, seconds
    pub start: f64,
    /// Length in seconds
    pub duration: f64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Splits a decoded buffer into overlapping windows of bounded length
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_duration: f64,
    chunk_overlap: f64,
}

impl Chunker {
    pub fn new(max_chunk_duration: f64, chunk_overlap: f64) -> Result<Self> {
        if !(max_chunk_duration > 0.0) || chunk_overlap < 0.0 || chunk_overlap >= max_chunk_duration {
            return Err(JimakuError::Config(format!(
                "invalid chunk window: duration {}s, overlap {}s",
                max_chunk_duration, chunk_overlap
            )));
        }
        Ok(Self { max_chunk_duration, chunk_overlap })
    }

    pub fn from_config(config: &ChunkerConfig) -> Result<Self> {
        Self::new(config.max_chunk_duration, config.chunk_overlap)
    }

    /// Cut the buffer into chunks covering `[0, duration)`
    pub fn chunk(&self, buffer: &AudioBuffer) -> Result<Vec<AudioChunk>> {
        if buffer.samples.is_empty() || buffer.sample_rate == 0 {
            return Err(JimakuError::InvalidAudio("audio has zero length".to_string()));
        }

        let rate = buffer.sample_rate as f64;
        let window = (self.max_chunk_duration * rate).round() as usize;
        let overlap = (self.chunk_overlap * rate).round() as usize;
        if window == 0 || overlap >= window {
            return Err(JimakuError::Config(format!(
                "chunk window of {} samples cannot hold an overlap of {} samples",
                window, overlap
            )));
        }
        let step = window - overlap;
        let total = buffer.samples.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + window).min(total);
            chunks.push(AudioChunk {
                index: chunks.len(),
                start: start as f64 / rate,
                duration: (end - start) as f64 / rate,
                sample_rate: buffer.sample_rate,
                samples: buffer.samples[start..end].to_vec(),
            });
            if end == total {
                break;
            }
            start += step;
        }

        info!(
            "Split {:.1}s of audio into {} chunks ({}s window, {}s overlap)",
            buffer.duration(),
            chunks.len(),
            self.max_chunk_duration,
            self.chunk_overlap
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent(seconds: usize, rate: u32) -> AudioBuffer {
        AudioBuffer { samples: vec![0.0; seconds * rate as usize], sample_rate: rate }
    }

    #[test]
    fn test_forty_seconds_yields_two_chunks() {
        let chunker = Chunker::new(30.0, 2.0).unwrap();
        let chunks = chunker.chunk(&silent(40, 100)).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0.0);
        assert_eq!(chunks[0].end(), 30.0);
        assert_eq!(chunks[1].start, 28.0);
        assert_eq!(chunks[1].end(), 40.0);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_chunks_cover_input_with_overlap() {
        let chunker = Chunker::new(10.0, 1.5).unwrap();
        let chunks = chunker.chunk(&silent(47, 200)).unwrap();

        assert_eq!(chunks.first().unwrap().start, 0.0);
        assert!((chunks.last().unwrap().end() - 47.0).abs() < 1e-9);
        for pair in chunks.windows(2) {
            assert!((pair[0].end() - pair[1].start - 1.5).abs() < 1e-9);
            assert!(pair[0].duration <= 10.0);
        }
    }

    #[test]
    fn test_short_input_is_single_chunk() {
        let chunker = Chunker::new(30.0, 2.0).unwrap();
        let chunks = chunker.chunk(&silent(5, 100)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].duration, 5.0);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_window() {
        let chunker = Chunker::new(30.0, 2.0).unwrap();
        let chunks = chunker.chunk(&silent(30, 100)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_zero_length_is_invalid() {
        let chunker = Chunker::new(30.0, 2.0).unwrap();
        let err = chunker.chunk(&AudioBuffer { samples: vec![], sample_rate: 16_000 }).unwrap_err();
        assert!(matches!(err, JimakuError::InvalidAudio(_)));
    }

    #[test]
    fn test_overlap_not_smaller_than_window_rejected() {
        assert!(Chunker::new(5.0, 5.0).is_err());
        assert!(Chunker::new(0.0, 0.0).is_err());
    }
}
