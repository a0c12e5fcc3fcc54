use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, JimakuError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub chunker: ChunkerConfig,
    pub transcriber: TranscriberConfig,
    pub quality: QualityConfig,
    pub cues: CueConfig,
    pub annotate: AnnotateConfig,
    pub correct: CorrectConfig,
    pub translate: TranslateConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate the speech model expects; input is resampled to it
    pub target_sample_rate: u32,
    /// Path to ffmpeg binary, used for non-WAV inputs
    pub ffmpeg_path: String,
    /// ffmpeg `-af` filter chain; when set every input, WAV included, goes through ffmpeg
    pub audio_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk length in seconds
    pub max_chunk_duration: f64,
    /// Overlap between consecutive chunks in seconds
    pub chunk_overlap: f64,
    /// Which chunk keeps a token found in both sides of an overlap
    pub overlap_policy: OverlapPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Keep the chunk whose overlap is the smaller share of its duration; ties keep the earlier chunk
    SmallerRelativeOverlap,
    /// Always keep the earlier chunk
    PreferEarlier,
    /// Always keep the later chunk
    PreferLater,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Speech backend implementation
    pub backend: TranscriberBackend,
    /// Path to transcriber binary (e.g., whisper-cli)
    pub binary_path: String,
    /// Path to the ggml model file
    pub model_path: String,
    /// Spoken language of the input
    pub language: String,
    pub beam_size: u32,
    pub no_speech_threshold: f32,
    pub log_prob_threshold: f32,
    pub threads: u32,
    /// Attempts per chunk for decode failures
    pub transcription_attempts: u32,
    /// Number of chunks allowed on the model at once
    pub gpu_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriberBackend {
    WhisperCpp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Tokens below this confidence are dropped
    pub min_confidence: f32,
    /// Longest run of identical tokens kept before the rest is treated as a hallucination loop
    pub max_repeats: usize,
    /// Drop bracketed non-speech markers such as [音楽]
    pub drop_markers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    /// Maximum cue length in seconds
    pub max_cue_duration: f64,
    /// Maximum rendered characters per cue
    pub max_cue_chars: usize,
    /// Gap between tokens (seconds) that closes the current cue
    pub silence_gap_threshold: f64,
    /// Close a cue after sentence-final punctuation
    pub break_on_sentence_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub enabled: bool,
    /// Path to the mecab binary
    pub mecab_path: String,
    /// Extra arguments for mecab, e.g. ["-d", "/usr/lib/mecab/dic/unidic"]
    pub mecab_args: Vec<String>,
    /// jmdict-simplified JSON file; without it every gloss list is empty
    pub dictionary_path: Option<String>,
    /// Memoized lookups per run
    pub cache_capacity: usize,
}

/// LLM cleanup of recognized cue text before annotation and translation.
/// Uses the backend, model and retry settings of `[translate]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    pub enabled: bool,
    pub backend: TranslationBackendKind,
    /// Service base URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Environment variable holding the API key (chat completions backend)
    pub api_key_env: String,
    pub source_language: String,
    pub target_language: String,
    /// Number of previous cues sent as context
    pub translation_context_window: usize,
    /// Attempts per cue before the translation is left absent
    pub translation_retry_limit: u32,
    /// First backoff delay; doubles on every retry
    pub backoff_base_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationBackendKind {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent per-cue annotation tasks
    pub worker_concurrency: usize,
    /// Concurrent translation requests
    pub translation_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Second SRT line under each cue
    pub secondary_line: SecondaryLine,
    /// Also write the annotated document as JSON next to the SRT
    pub write_json: bool,
    /// Also write the plain transcript as text next to the SRT
    pub write_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryLine {
    None,
    Translation,
    Reading,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            ffmpeg_path: "ffmpeg".to_string(),
            audio_filter: None,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_duration: 30.0,
            chunk_overlap: 2.0,
            overlap_policy: OverlapPolicy::SmallerRelativeOverlap,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            backend: TranscriberBackend::WhisperCpp,
            binary_path: "whisper-cli".to_string(),
            model_path: "models/ggml-large-v3.bin".to_string(),
            language: "ja".to_string(),
            beam_size: 5,
            no_speech_threshold: 0.3,
            log_prob_threshold: -1.0,
            threads: 4,
            transcription_attempts: 2,
            gpu_concurrency: 1,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            max_repeats: 4,
            drop_markers: true,
        }
    }
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            max_cue_duration: 7.0,
            max_cue_chars: 32,
            silence_gap_threshold: 0.8,
            break_on_sentence_end: true,
        }
    }
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mecab_path: "mecab".to_string(),
            mecab_args: vec![],
            dictionary_path: None,
            cache_capacity: 1024,
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: TranslationBackendKind::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            source_language: "ja".to_string(),
            target_language: "en".to_string(),
            translation_context_window: 2,
            translation_retry_limit: 3,
            backoff_base_ms: 500,
            request_timeout_secs: 300,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 8,
            translation_concurrency: 4,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            secondary_line: SecondaryLine::Translation,
            write_json: false,
            write_text: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JimakuError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| JimakuError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| JimakuError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| JimakuError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject option combinations the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        let chunker = &self.chunker;
        if !(chunker.max_chunk_duration > 0.0) {
            return Err(JimakuError::Config("max_chunk_duration must be positive".to_string()));
        }
        if chunker.chunk_overlap < 0.0 || chunker.chunk_overlap >= chunker.max_chunk_duration {
            return Err(JimakuError::Config(format!(
                "chunk_overlap must be in [0, {}), got {}",
                chunker.max_chunk_duration, chunker.chunk_overlap
            )));
        }
        if !(self.cues.max_cue_duration > 0.0) {
            return Err(JimakuError::Config("max_cue_duration must be positive".to_string()));
        }
        if self.cues.max_cue_chars == 0 {
            return Err(JimakuError::Config("max_cue_chars must be at least 1".to_string()));
        }
        if self.cues.silence_gap_threshold < 0.0 {
            return Err(JimakuError::Config("silence_gap_threshold must not be negative".to_string()));
        }
        if self.audio.target_sample_rate == 0 {
            return Err(JimakuError::Config("target_sample_rate must be positive".to_string()));
        }
        if self.transcriber.gpu_concurrency == 0
            || self.pipeline.worker_concurrency == 0
            || self.pipeline.translation_concurrency == 0
        {
            return Err(JimakuError::Config("concurrency limits must be at least 1".to_string()));
        }
        if self.transcriber.transcription_attempts == 0 {
            return Err(JimakuError::Config("transcription_attempts must be at least 1".to_string()));
        }
        if self.translate.translation_retry_limit == 0 {
            return Err(JimakuError::Config("translation_retry_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}
