// Speech recognition layer
//
// - SpeechBackend: capability trait over a concrete model (whisper.cpp today)
// - TranscriptionEngine: owns the backend handle, limits concurrent chunk
//   calls and converts chunk-local timestamps to global ones
// - merge: overlap deduplication across chunk boundaries
//
// To add a new backend:
// 1. Implement SpeechBackend, returning chunk-local tokens
// 2. Add it to TranscriberBackend in config
// 3. Update TranscriberFactory::create_backend

pub mod engine;
pub mod merge;
pub mod whisper_cpp;

use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use engine::{ChunkTranscript, TranscriptionEngine};
pub use merge::{collapse_duplicates, merge_chunks};
use crate::audio::AudioChunk;
use crate::config::{TranscriberBackend, TranscriberConfig};
use crate::error::TranscriptionError;

/// One recognized word or sub-word unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    /// Seconds from the start of the original audio
    pub start: f64,
    pub end: f64,
    /// 0.0 to 1.0
    pub confidence: f32,
}

impl Token {
    pub fn new(text: impl Into<String>, start: f64, end: f64, confidence: f32) -> Self {
        Self { text: text.into(), start, end, confidence }
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Speech-to-text capability. Timestamps in the result are chunk-local.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<Token>, TranscriptionError>;
}

/// Factory for creating speech backends
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_backend(config: &TranscriberConfig) -> Arc<dyn SpeechBackend> {
        match config.backend {
            TranscriberBackend::WhisperCpp => {
                Arc::new(whisper_cpp::WhisperCppBackend::new(config.clone()))
            }
        }
    }

    /// Backend wrapped in an engine with the configured limits
    pub fn create_engine(config: &TranscriberConfig) -> TranscriptionEngine {
        TranscriptionEngine::new(
            Self::create_backend(config),
            config.gpu_concurrency,
            config.transcription_attempts,
        )
    }
}
