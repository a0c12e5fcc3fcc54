use thiserror::Error;

#[derive(Error, Debug)]
pub enum JimakuError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Transcription error: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("All {0} audio chunks failed to transcribe")]
    TranscriptionExhausted(usize),

    #[error("Cue assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Annotation error: {0}")]
    Annotation(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Subtitle parse error: {0}")]
    SubtitleParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Pipeline run cancelled")]
    Cancelled,
}

impl JimakuError {
    /// Short name of the error kind, used in run reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAudio(_) => "InvalidAudioError",
            Self::Transcription(TranscriptionError::ModelUnavailable(_)) => "ModelUnavailable",
            Self::Transcription(TranscriptionError::DecodeFailure(_)) => "DecodeFailure",
            Self::TranscriptionExhausted(_) => "TranscriptionExhausted",
            Self::Assembly(_) => "AssemblyError",
            Self::Cancelled => "Cancelled",
            Self::Config(_) => "ConfigError",
            _ => "InternalError",
        }
    }
}

/// Failure of the speech backend on a single chunk.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscriptionError {
    #[error("speech model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("failed to decode chunk: {0}")]
    DecodeFailure(String),
}

impl TranscriptionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DecodeFailure(_))
    }
}

/// Contract violation detected while verifying an assembled document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("cue {index} is empty")]
    EmptyCue { index: usize },

    #[error("cue {index} ends before it starts ({start:.3}s > {end:.3}s)")]
    InvertedSpan { index: usize, start: f64, end: f64 },

    #[error("cue {index} starts at {start:.3}s before previous cue start {previous_start:.3}s")]
    OutOfOrder { index: usize, start: f64, previous_start: f64 },

    #[error("cue {index} ends at {end:.3}s after next cue starts at {next_start:.3}s")]
    Overlap { index: usize, end: f64, next_start: f64 },

    #[error("cue {index} lasts {duration:.3}s, limit is {max:.3}s")]
    DurationExceeded { index: usize, duration: f64, max: f64 },

    #[error("cue {index} has {chars} characters, limit is {max}")]
    LengthExceeded { index: usize, chars: usize, max: usize },

    #[error("token stream is not time-ordered at position {position}")]
    UnorderedTokens { position: usize },
}

/// Error returned by a text-generation backend, classified for retry decisions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request rejected: {0}")]
    Fatal(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, JimakuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_fatal_errors() {
        assert_eq!(JimakuError::InvalidAudio("empty".to_string()).kind(), "InvalidAudioError");
        assert_eq!(JimakuError::TranscriptionExhausted(3).kind(), "TranscriptionExhausted");
        assert_eq!(JimakuError::from(AssemblyError::EmptyCue { index: 0 }).kind(), "AssemblyError");
        assert_eq!(JimakuError::Cancelled.kind(), "Cancelled");
        assert_eq!(
            JimakuError::from(TranscriptionError::ModelUnavailable("gone".to_string())).kind(),
            "ModelUnavailable"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(TranscriptionError::DecodeFailure("x".to_string()).is_retryable());
        assert!(!TranscriptionError::ModelUnavailable("x".to_string()).is_retryable());
        assert!(BackendError::RateLimited("x".to_string()).is_retryable());
        assert!(BackendError::Transient("x".to_string()).is_retryable());
        assert!(!BackendError::Fatal("x".to_string()).is_retryable());
    }
}
