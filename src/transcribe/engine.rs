use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{SpeechBackend, Token};
use crate::audio::AudioChunk;
use crate::error::TranscriptionError;

/// Tokens of one chunk with global timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTranscript {
    pub chunk_index: usize,
    pub start: f64,
    pub duration: f64,
    pub tokens: Vec<Token>,
    /// Set when the chunk is an empty placeholder for a failed transcription
    pub failure: Option<TranscriptionError>,
}

impl ChunkTranscript {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Empty stand-in for a chunk whose transcription failed
    pub fn placeholder(chunk: &AudioChunk, failure: TranscriptionError) -> Self {
        Self {
            chunk_index: chunk.index,
            start: chunk.start,
            duration: chunk.duration,
            tokens: Vec::new(),
            failure: Some(failure),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.failure.is_some()
    }
}

/// Owns the speech model handle for the process lifetime.
///
/// Every call to the backend holds a permit of `model_permits`, so the
/// number of chunks on the model at once never exceeds the configured
/// GPU concurrency regardless of how many chunk tasks are spawned.
#[derive(Clone)]
pub struct TranscriptionEngine {
    backend: Arc<dyn SpeechBackend>,
    model_permits: Arc<Semaphore>,
    attempts: u32,
}

impl TranscriptionEngine {
    pub fn new(backend: Arc<dyn SpeechBackend>, gpu_concurrency: usize, attempts: u32) -> Self {
        Self {
            backend,
            model_permits: Arc::new(Semaphore::new(gpu_concurrency.max(1))),
            attempts: attempts.max(1),
        }
    }

    /// Transcribe one chunk and shift its tokens onto the global timeline
    pub async fn transcribe_chunk(&self, chunk: &AudioChunk) -> Result<ChunkTranscript, TranscriptionError> {
        let mut attempt = 0;
        let local_tokens = loop {
            attempt += 1;
            let result = {
                let _permit = self.model_permits
                    .acquire()
                    .await
                    .map_err(|_| TranscriptionError::ModelUnavailable("model pool closed".to_string()))?;
                debug!("Chunk {} on model (attempt {}/{})", chunk.index, attempt, self.attempts);
                self.backend.transcribe(chunk).await
            };

            match result {
                Ok(tokens) => break tokens,
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!("Chunk {} attempt {} failed: {}, retrying", chunk.index, attempt, e);
                }
                Err(e) => return Err(e),
            }
        };

        let tokens = globalize(chunk, local_tokens);
        info!(
            "Chunk {} [{:.2}s, {:.2}s) produced {} tokens",
            chunk.index,
            chunk.start,
            chunk.end(),
            tokens.len()
        );

        Ok(ChunkTranscript {
            chunk_index: chunk.index,
            start: chunk.start,
            duration: chunk.duration,
            tokens,
            failure: None,
        })
    }
}

/// Add the chunk offset, clamp to the chunk window, drop blank or inverted tokens
fn globalize(chunk: &AudioChunk, tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter_map(|token| {
            let text = token.text.trim();
            if text.is_empty() {
                return None;
            }
            let start = token.start.clamp(0.0, chunk.duration);
            let end = token.end.clamp(0.0, chunk.duration);
            if end < start {
                return None;
            }
            Some(Token {
                text: text.to_string(),
                start: chunk.start + start,
                end: chunk.start + end,
                confidence: token.confidence.clamp(0.0, 1.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::MockSpeechBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(index: usize, start: f64, duration: f64) -> AudioChunk {
        AudioChunk { index, start, duration, sample_rate: 16_000, samples: vec![0.0; 16] }
    }

    #[tokio::test]
    async fn test_offsets_are_applied() {
        let mut backend = MockSpeechBackend::new();
        backend.expect_transcribe().returning(|_| {
            Ok(vec![Token::new(" こんにちは", 0.5, 1.0, 0.9), Token::new("  ", 1.0, 1.1, 0.9)])
        });
        let engine = TranscriptionEngine::new(Arc::new(backend), 1, 1);

        let transcript = engine.transcribe_chunk(&chunk(1, 28.0, 12.0)).await.unwrap();
        assert_eq!(transcript.tokens, vec![Token::new("こんにちは", 28.5, 29.0, 0.9)]);
        assert!(!transcript.is_placeholder());
    }

    #[tokio::test]
    async fn test_decode_failure_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut backend = MockSpeechBackend::new();
        backend.expect_transcribe().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TranscriptionError::DecodeFailure("bad frame".to_string()))
            } else {
                Ok(vec![Token::new("はい", 0.0, 0.4, 0.8)])
            }
        });
        let engine = TranscriptionEngine::new(Arc::new(backend), 1, 2);

        let transcript = engine.transcribe_chunk(&chunk(0, 0.0, 30.0)).await.unwrap();
        assert_eq!(transcript.tokens.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_model_unavailable_is_not_retried() {
        let mut backend = MockSpeechBackend::new();
        backend
            .expect_transcribe()
            .times(1)
            .returning(|_| Err(TranscriptionError::ModelUnavailable("no model".to_string())));
        let engine = TranscriptionEngine::new(Arc::new(backend), 1, 3);

        let err = engine.transcribe_chunk(&chunk(0, 0.0, 30.0)).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::ModelUnavailable(_)));
    }

    struct SlowBackend {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SpeechBackend for SlowBackend {
        async fn transcribe(&self, _chunk: &AudioChunk) -> Result<Vec<Token>, TranscriptionError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_model_calls_are_serialized() {
        let backend = Arc::new(SlowBackend { active: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let engine = TranscriptionEngine::new(backend.clone(), 1, 1);

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.transcribe_chunk(&chunk(i, i as f64 * 28.0, 30.0)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
    }
}
