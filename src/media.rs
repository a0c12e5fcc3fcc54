use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::audio::AudioBuffer;
use crate::config::AudioConfig;
use crate::error::{JimakuError, Result};

/// Extensions picked up by directory processing
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "wav", "mp3", "m4a", "flac", "ogg", "opus", "aac", "mp4", "mkv", "mov", "avi", "webm",
];

/// Speech band pass plus loudness normalization for noisy recordings
pub const SPEECH_BAND_FILTER: &str = "highpass=f=300,lowpass=f=3400,loudnorm";

pub fn is_wav(path: &Path) -> bool {
    has_extension(path, &["wav"])
}

pub fn is_media_file(path: &Path) -> bool {
    has_extension(path, MEDIA_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// ffmpeg wrapper turning any container into mono 16-bit PCM WAV
pub struct MediaExtractor {
    binary_path: String,
    sample_rate: u32,
    audio_filter: Option<String>,
}

impl MediaExtractor {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            binary_path: config.ffmpeg_path.clone(),
            sample_rate: config.target_sample_rate,
            audio_filter: config.audio_filter.clone().filter(|f| !f.trim().is_empty()),
        }
    }

    /// With a filter configured, WAV input needs ffmpeg too
    pub fn filters_audio(&self) -> bool {
        self.audio_filter.is_some()
    }

    fn extraction_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into(), "-vn".into()];
        if let Some(filter) = &self.audio_filter {
            args.push("-af".into());
            args.push(filter.into());
        }
        args.extend([
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            self.sample_rate.to_string().into(),
            "-ac".into(),
            "1".into(),
            output.into(),
        ]);
        args
    }

    /// Extract the audio track of `input` to `output` as WAV
    pub async fn extract_audio(&self, input: &Path, output: &Path) -> Result<()> {
        info!("Extracting audio from {} to {}", input.display(), output.display());

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(self.extraction_args(input, output)).kill_on_drop(true);

        debug!("Executing ffmpeg command: {:?}", cmd);

        let result = cmd.output()
            .await
            .map_err(|e| JimakuError::Media(format!("Failed to execute ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(JimakuError::Media(format!("Audio extraction failed: {}", stderr.trim())));
        }

        info!("Audio extraction completed");
        Ok(())
    }

    /// Decode `path` into samples; non-WAV or filtered input goes through ffmpeg first
    pub async fn load_audio(&self, path: &Path) -> Result<AudioBuffer> {
        if !path.exists() {
            return Err(JimakuError::FileNotFound(path.display().to_string()));
        }
        if !is_media_file(path) {
            return Err(JimakuError::UnsupportedFormat(path.display().to_string()));
        }
        if is_wav(path) && !self.filters_audio() {
            return decode_wav(path.to_path_buf()).await;
        }

        let scratch = tempfile::tempdir()?;
        let wav_path = scratch.path().join("audio.wav");
        self.extract_audio(path, &wav_path).await?;
        decode_wav(wav_path).await
    }

    pub async fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| JimakuError::Media(format!("FFmpeg not found: {}", e)))?;

        if output.status.success() {
            info!("FFmpeg is available");
            Ok(())
        } else {
            Err(JimakuError::Media("FFmpeg version check failed".to_string()))
        }
    }
}

async fn decode_wav(path: PathBuf) -> Result<AudioBuffer> {
    tokio::task::spawn_blocking(move || AudioBuffer::from_wav_file(&path))
        .await
        .map_err(|e| JimakuError::Media(format!("WAV decoding task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn extractor(binary: &str) -> MediaExtractor {
        MediaExtractor::new(&AudioConfig { ffmpeg_path: binary.to_string(), ..AudioConfig::default() })
    }

    fn filtering_extractor(binary: &str) -> MediaExtractor {
        MediaExtractor::new(&AudioConfig {
            ffmpeg_path: binary.to_string(),
            audio_filter: Some(SPEECH_BAND_FILTER.to_string()),
            ..AudioConfig::default()
        })
    }

    fn write_tone(path: &Path, rate: u32, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..rate * seconds {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_extension_checks() {
        assert!(is_wav(Path::new("a/b/Episode01.WAV")));
        assert!(!is_wav(Path::new("episode.mp4")));
        assert!(is_media_file(Path::new("episode.mkv")));
        assert!(!is_media_file(Path::new("notes.txt")));
        assert!(!is_media_file(Path::new("no_extension")));
    }

    #[tokio::test]
    async fn test_wav_is_decoded_without_ffmpeg() {
        let temp = TempDir::new().unwrap();
        let wav = temp.child("clip.wav");
        write_tone(wav.path(), 16_000, 2);

        let buffer = extractor("/nonexistent/ffmpeg").load_audio(wav.path()).await.unwrap();
        assert_eq!(buffer.sample_rate, 16_000);
        assert!((buffer.duration() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_extraction_args() {
        let plain = extractor("ffmpeg").extraction_args(Path::new("in.mkv"), Path::new("out.wav"));
        assert_eq!(
            plain,
            ["-y", "-i", "in.mkv", "-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "out.wav"]
                .map(OsString::from)
                .to_vec()
        );

        let filtered = filtering_extractor("ffmpeg").extraction_args(Path::new("in.wav"), Path::new("out.wav"));
        let position = filtered.iter().position(|a| a == "-af").unwrap();
        assert_eq!(filtered[position + 1], OsString::from(SPEECH_BAND_FILTER));
        assert!(position > filtered.iter().position(|a| a == "in.wav").unwrap());
        assert!(position < filtered.iter().position(|a| a == "-acodec").unwrap());
    }

    #[test]
    fn test_blank_filter_is_ignored() {
        let extractor = MediaExtractor::new(&AudioConfig { audio_filter: Some("  ".to_string()), ..AudioConfig::default() });
        assert!(!extractor.filters_audio());
    }

    #[tokio::test]
    async fn test_filtered_wav_goes_through_ffmpeg() {
        let temp = TempDir::new().unwrap();
        let wav = temp.child("clip.wav");
        write_tone(wav.path(), 16_000, 1);

        let err = filtering_extractor("/nonexistent/ffmpeg").load_audio(wav.path()).await.unwrap_err();
        assert!(matches!(err, JimakuError::Media(_)));
    }

    #[tokio::test]
    async fn test_missing_input() {
        let err = extractor("ffmpeg").load_audio(Path::new("/nonexistent/clip.wav")).await.unwrap_err();
        assert!(matches!(err, JimakuError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_extension_is_rejected() {
        let temp = TempDir::new().unwrap();
        let notes = temp.child("notes.txt");
        notes.write_str("not audio").unwrap();

        let err = extractor("ffmpeg").load_audio(notes.path()).await.unwrap_err();
        assert!(matches!(err, JimakuError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_media_error() {
        let temp = TempDir::new().unwrap();
        let video = temp.child("episode.mp4");
        video.write_binary(&[0u8; 16]).unwrap();

        let extractor = extractor("/nonexistent/ffmpeg");
        assert!(matches!(extractor.load_audio(video.path()).await, Err(JimakuError::Media(_))));
        assert!(matches!(extractor.check_availability().await, Err(JimakuError::Media(_))));
    }
}
