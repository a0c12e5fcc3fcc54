use async_trait::async_trait;
use std::path::Path;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::audio::AudioChunk;
use crate::config::TranscriberConfig;
use crate::error::TranscriptionError;
use super::{SpeechBackend, Token};

/// Whisper.cpp full JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
    #[serde(default)]
    pub tokens: Vec<WhisperCppToken>,
}

/// Milliseconds from the start of the input file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

impl WhisperCppOffsets {
    fn seconds(&self) -> (f64, f64) {
        let start = self.from as f64 / 1000.0;
        (start, (self.to as f64 / 1000.0).max(start))
    }
}

/// A decoder token; `-ojf` reports its own offsets and probability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppToken {
    pub text: String,
    #[serde(default)]
    pub offsets: Option<WhisperCppOffsets>,
    #[serde(default)]
    pub p: Option<f32>,
}

impl WhisperCppToken {
    fn is_word(&self) -> bool {
        !self.text.trim().is_empty() && !is_special(&self.text)
    }
}

impl WhisperCppSegment {
    /// Mean probability of the non-special tokens, 1.0 when none are reported
    fn confidence(&self) -> f32 {
        let probs: Vec<f32> = self.tokens
            .iter()
            .filter(|t| !is_special(&t.text))
            .filter_map(|t| t.p)
            .collect();
        if probs.is_empty() {
            1.0
        } else {
            probs.iter().sum::<f32>() / probs.len() as f32
        }
    }

    /// One token per decoder token, or `None` when the tokens lack offsets
    /// or carry a multi-byte character split across them
    fn word_tokens(&self) -> Option<Vec<Token>> {
        let words: Vec<&WhisperCppToken> = self.tokens.iter().filter(|t| t.is_word()).collect();
        if words.is_empty() {
            return None;
        }

        words
            .into_iter()
            .map(|word| {
                if word.text.contains(char::REPLACEMENT_CHARACTER) {
                    return None;
                }
                let (start, end) = word.offsets.as_ref()?.seconds();
                Some(Token {
                    text: word.text.trim().to_string(),
                    start,
                    end,
                    confidence: word.p.unwrap_or(1.0),
                })
            })
            .collect()
    }

    fn segment_token(&self) -> Token {
        let (start, end) = self.offsets.seconds();
        Token {
            text: self.text.trim().to_string(),
            start,
            end,
            confidence: self.confidence(),
        }
    }
}

fn is_special(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("[_") || trimmed.starts_with("<|")
}

/// Convert whisper.cpp output to chunk-local tokens, one per decoder token
/// where possible and one per segment otherwise
pub fn tokens_from_output(output: WhisperCppOutput) -> Vec<Token> {
    output.transcription
        .into_iter()
        .filter(|seg| !seg.text.trim().is_empty() && !is_special(&seg.text))
        .flat_map(|seg| seg.word_tokens().unwrap_or_else(|| vec![seg.segment_token()]))
        .collect()
}

/// Runs the whisper.cpp CLI on each chunk written to a temporary WAV file
pub struct WhisperCppBackend {
    config: TranscriberConfig,
}

impl WhisperCppBackend {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    fn write_chunk_wav(chunk: &AudioChunk, path: &Path) -> Result<(), TranscriptionError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: chunk.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .map_err(|e| TranscriptionError::DecodeFailure(format!("Failed to create chunk WAV: {}", e)))?;
        for &sample in &chunk.samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(value)
                .map_err(|e| TranscriptionError::DecodeFailure(format!("Failed to write chunk WAV: {}", e)))?;
        }
        writer.finalize()
            .map_err(|e| TranscriptionError::DecodeFailure(format!("Failed to finalize chunk WAV: {}", e)))
    }
}

#[async_trait]
impl SpeechBackend for WhisperCppBackend {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<Token>, TranscriptionError> {
        if !Path::new(&self.config.model_path).exists() {
            return Err(TranscriptionError::ModelUnavailable(format!(
                "Whisper model not found at: {}",
                self.config.model_path
            )));
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| TranscriptionError::DecodeFailure(format!("Failed to create temp directory: {}", e)))?;
        let wav_path = temp_dir.path().join(format!("chunk_{:05}.wav", chunk.index));
        let output_base = temp_dir.path().join(format!("chunk_{:05}", chunk.index));
        Self::write_chunk_wav(chunk, &wav_path)?;

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-m").arg(&self.config.model_path)
            .arg("-f").arg(&wav_path)
            .arg("-l").arg(&self.config.language)
            .arg("-bs").arg(self.config.beam_size.to_string())
            .arg("-t").arg(self.config.threads.to_string())
            .arg("-nth").arg(self.config.no_speech_threshold.to_string())
            .arg("-lpt").arg(self.config.log_prob_threshold.to_string())
            .arg("-mc").arg("0") // no conditioning on previous text
            .arg("-ojf")
            .arg("-of").arg(&output_base)
            .arg("-np");

        debug!("Executing whisper command: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TranscriptionError::ModelUnavailable(format!(
                    "whisper binary '{}' not found",
                    self.config.binary_path
                ))
            } else {
                TranscriptionError::DecodeFailure(format!("Failed to execute whisper: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::DecodeFailure(format!("Whisper failed: {}", stderr.trim())));
        }

        let json_file = output_base.with_extension("json");
        let json_content = tokio::fs::read(&json_file).await
            .map_err(|e| TranscriptionError::DecodeFailure(format!("Failed to read output: {}", e)))?;
        // whisper.cpp can split multi-byte characters across tokens
        let json_content = String::from_utf8_lossy(&json_content);

        let whisper_output: WhisperCppOutput = serde_json::from_str(&json_content)
            .map_err(|e| TranscriptionError::DecodeFailure(format!("Failed to parse Whisper.cpp JSON: {}", e)))?;

        Ok(tokens_from_output(whisper_output))
    }
}
