// Translation stage
//
// - TranslationBackend: one request to a text-generation service, errors
//   classified for retry decisions; translation and same-language correction
// - CueTranslator: retry with exponential backoff, a cue that keeps failing
//   is reported as a miss instead of an error
// - ollama / openai: concrete backends
//
// To add a new backend:
// 1. Implement TranslationBackend
// 2. Add it to TranslationBackendKind in config
// 3. Update TranslatorFactory::create_backend

pub mod ollama;
pub mod openai;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

pub use ollama::{check_ollama_availability, OllamaBackend};
pub use openai::OpenAiBackend;
use crate::config::{TranslateConfig, TranslationBackendKind};
use crate::error::{BackendError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Translate one cue; `context` holds the preceding cue texts, oldest first
    async fn translate(&self, text: &str, context: &[String]) -> std::result::Result<String, BackendError>;

    /// Clean up a recognized cue in its source language
    async fn correct(&self, text: &str, context: &[String]) -> std::result::Result<String, BackendError>;
}

/// Map a non-success HTTP status onto the retry classification
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message = format!("HTTP {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::RateLimited(message)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        BackendError::Transient(message)
    } else {
        BackendError::Fatal(message)
    }
}

/// Network-level failures are always worth another attempt
pub fn classify_request_error(error: reqwest::Error) -> BackendError {
    BackendError::Transient(format!("HTTP request failed: {}", error))
}

/// A cue whose translation was given up on
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationFailure {
    pub attempts: u32,
    pub error: BackendError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Translate,
    Correct,
}

impl Request {
    fn label(self) -> &'static str {
        match self {
            Self::Translate => "translation",
            Self::Correct => "correction",
        }
    }
}

/// Retrying wrapper around a backend
#[derive(Clone)]
pub struct CueTranslator {
    backend: Arc<dyn TranslationBackend>,
    attempt_limit: u32,
    backoff_base_ms: u64,
}

impl CueTranslator {
    pub fn new(backend: Arc<dyn TranslationBackend>, attempt_limit: u32, backoff_base_ms: u64) -> Self {
        Self { backend, attempt_limit: attempt_limit.max(1), backoff_base_ms }
    }

    pub fn from_config(backend: Arc<dyn TranslationBackend>, config: &TranslateConfig) -> Self {
        Self::new(backend, config.translation_retry_limit, config.backoff_base_ms)
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    pub async fn translate_cue(
        &self,
        text: &str,
        context: &[String],
    ) -> std::result::Result<String, TranslationFailure> {
        self.request(Request::Translate, text, context).await
    }

    /// Same retry policy as [`Self::translate_cue`], for same-language cleanup
    pub async fn correct_cue(
        &self,
        text: &str,
        context: &[String],
    ) -> std::result::Result<String, TranslationFailure> {
        self.request(Request::Correct, text, context).await
    }

    async fn request(
        &self,
        kind: Request,
        text: &str,
        context: &[String],
    ) -> std::result::Result<String, TranslationFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match kind {
                Request::Translate => self.backend.translate(text, context).await,
                Request::Correct => self.backend.correct(text, context).await,
            };
            match result {
                Ok(reply) => {
                    debug!("{} of '{}' -> '{}' (attempt {})", kind.label(), text, reply, attempt);
                    return Ok(reply);
                }
                Err(error) if error.is_retryable() && attempt < self.attempt_limit => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        kind.label(), attempt, self.attempt_limit, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!("Giving up on {} of '{}' after {} attempts: {}", kind.label(), text, attempt, error);
                    return Err(TranslationFailure { attempts: attempt, error });
                }
            }
        }
    }
}

/// Factory for creating translation backends
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_backend(config: &TranslateConfig) -> Result<Arc<dyn TranslationBackend>> {
        let backend: Arc<dyn TranslationBackend> = match config.backend {
            TranslationBackendKind::Ollama => Arc::new(OllamaBackend::new(config)?),
            TranslationBackendKind::OpenAi => Arc::new(OpenAiBackend::new(config)?),
        };
        Ok(backend)
    }

    pub fn create_translator(config: &TranslateConfig) -> Result<CueTranslator> {
        Ok(CueTranslator::from_config(Self::create_backend(config)?, config))
    }

    /// Fail early when the configured service cannot serve the model
    pub async fn check_availability(config: &TranslateConfig) -> Result<()> {
        match config.backend {
            TranslationBackendKind::Ollama => check_ollama_availability(&config.endpoint, &config.model).await,
            TranslationBackendKind::OpenAi => openai::api_key(&config.api_key_env).map(|_| ()),
        }
    }
}
