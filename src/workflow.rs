use std::path::{Path, PathBuf};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SecondaryLine};
use crate::error::{JimakuError, Result};
use crate::media::{is_media_file, MediaExtractor};
use crate::pipeline::{CancelToken, Pipeline, RunReport};
use crate::subtitle::srt::{read_srt, write_srt};

/// Files written for one input
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub srt: PathBuf,
    pub json: PathBuf,
    pub text: PathBuf,
}

impl OutputPaths {
    /// `<output_dir>/<stem>.{srt,json,txt}`, defaulting to the input's directory
    pub fn for_input(input: &Path, output_dir: Option<&Path>) -> Result<Self> {
        let stem = input.file_stem()
            .ok_or_else(|| JimakuError::Config(format!("Invalid input filename: {}", input.display())))?
            .to_string_lossy()
            .to_string();

        let dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
        };

        Ok(Self {
            srt: dir.join(format!("{}.srt", stem)),
            json: dir.join(format!("{}.json", stem)),
            text: dir.join(format!("{}.txt", stem)),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct Workflow {
    config: Config,
    extractor: MediaExtractor,
    pipeline: Pipeline,
}

impl Workflow {
    /// Build the pipeline and check for ffmpeg. A missing ffmpeg is fatal only
    /// when an audio filter is set, since plain WAV input decodes without it.
    pub async fn new(config: Config) -> Result<Self> {
        let extractor = MediaExtractor::new(&config.audio);
        if let Err(e) = extractor.check_availability().await {
            if extractor.filters_audio() {
                return Err(e);
            }
            warn!("{}; only WAV input can be processed", e);
        }

        let pipeline = Pipeline::from_config(&config).await?;
        Ok(Self { config, extractor, pipeline })
    }

    pub fn with_pipeline(config: Config, pipeline: Pipeline) -> Self {
        Self {
            extractor: MediaExtractor::new(&config.audio),
            config,
            pipeline,
        }
    }

    /// Process one audio or video file into subtitles
    pub async fn process_file(
        &self,
        input: &Path,
        output_dir: Option<&Path>,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        info!("Processing single file: {}", input.display());
        let paths = OutputPaths::for_input(input, output_dir)?;
        if let Some(dir) = paths.srt.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        let audio = self.extractor.load_audio(input).await?;
        let report = self.pipeline.run(audio, cancel).await?;
        self.write_outputs(&report, &paths).await?;
        Ok(report)
    }

    /// Transcribe to a single SRT file at `output`
    pub async fn transcribe_file(&self, input: &Path, output: &Path, cancel: &CancelToken) -> Result<RunReport> {
        let audio = self.extractor.load_audio(input).await?;
        let report = self.pipeline.run(audio, cancel).await?;
        write_srt(&report.document, output, self.config.output.secondary_line).await?;
        info!("Subtitles written to {}", output.display());
        Ok(report)
    }

    /// Process every media file under `input_dir`; one file failing does not stop the batch
    pub async fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: Option<&Path>,
        cancel: &CancelToken,
    ) -> Result<BatchSummary> {
        info!("Processing directory: {}", input_dir.display());
        if !input_dir.is_dir() {
            return Err(JimakuError::Config(format!("{} is not a directory", input_dir.display())));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_media_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();
        info!("Found {} media files to process", files.len());

        let progress = ProgressBar::new(files.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress.set_style(style.progress_chars("#>-"));

        let mut summary = BatchSummary::default();
        for file in files {
            progress.set_message(file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());

            // Mirror the input tree under the output directory
            let target_dir = match (output_dir, file.parent().and_then(|p| p.strip_prefix(input_dir).ok())) {
                (Some(out), Some(relative)) => Some(out.join(relative)),
                (Some(out), None) => Some(out.to_path_buf()),
                (None, _) => None,
            };

            match self.process_file(&file, target_dir.as_deref(), cancel).await {
                Ok(report) => {
                    info!(
                        "Processed {}: {} cues, {} soft failures",
                        file.display(),
                        report.document.len(),
                        report.soft_failures.len()
                    );
                    summary.processed += 1;
                }
                Err(JimakuError::Cancelled) => {
                    progress.abandon_with_message("cancelled");
                    return Err(JimakuError::Cancelled);
                }
                Err(e) => {
                    warn!("Failed to process {}: {}", file.display(), e);
                    summary.failed.push((file.clone(), e.to_string()));
                }
            }
            progress.inc(1);
        }

        progress.finish_with_message("done");
        Ok(summary)
    }

    /// Translate (and annotate, if enabled) an existing SRT file
    pub async fn translate_srt(&self, input: &Path, output: &Path, cancel: &CancelToken) -> Result<RunReport> {
        info!("Translating subtitles {} -> {}", input.display(), output.display());
        let document = read_srt(input).await?;
        let report = self.pipeline.enrich_document(document, cancel).await?;
        write_srt(&report.document, output, SecondaryLine::Translation).await?;
        Ok(report)
    }

    async fn write_outputs(&self, report: &RunReport, paths: &OutputPaths) -> Result<()> {
        write_srt(&report.document, &paths.srt, self.config.output.secondary_line).await?;
        info!("Subtitles written to {}", paths.srt.display());

        if self.config.output.write_json {
            fs::write(&paths.json, serde_json::to_string_pretty(report)?).await?;
            info!("Run report written to {}", paths.json.display());
        }
        if self.config.output.write_text {
            fs::write(&paths.text, report.document.plain_text()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use crate::audio::AudioChunk;
    use crate::transcribe::{MockSpeechBackend, Token, TranscriptionEngine};
    use crate::translate::{CueTranslator, MockTranslationBackend};

    fn speech() -> TranscriptionEngine {
        let mut backend = MockSpeechBackend::new();
        backend
            .expect_transcribe()
            .returning(|_chunk: &AudioChunk| Ok(vec![Token::new("テスト。", 0.2, 0.8, 0.9)]));
        TranscriptionEngine::new(Arc::new(backend), 1, 1)
    }

    fn echo_translator() -> CueTranslator {
        let mut backend = MockTranslationBackend::new();
        backend
            .expect_translate()
            .returning(|text: &str, _context: &[String]| Ok(format!("EN:{}", text)));
        CueTranslator::new(Arc::new(backend), 1, 1)
    }

    fn workflow(config: Config, translator: Option<CueTranslator>) -> Workflow {
        let pipeline = Pipeline::new(config.clone(), speech(), None, translator).unwrap();
        Workflow::with_pipeline(config, pipeline)
    }

    fn write_silence(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..16_000 * seconds {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn offline_config(ffmpeg: &str) -> Config {
        let mut config = Config::default();
        config.audio.ffmpeg_path = ffmpeg.to_string();
        config.annotate.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_fatal_only_with_filter() {
        let mut config = offline_config("/nonexistent/ffmpeg");
        assert!(Workflow::new(config.clone()).await.is_ok());

        config.audio.audio_filter = Some(crate::media::SPEECH_BAND_FILTER.to_string());
        let err = Workflow::new(config).await.err().unwrap();
        assert!(matches!(err, JimakuError::Media(_)));
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::for_input(Path::new("/media/show/ep01.mkv"), None).unwrap();
        assert_eq!(paths.srt, PathBuf::from("/media/show/ep01.srt"));

        let paths = OutputPaths::for_input(Path::new("/media/show/ep01.mkv"), Some(Path::new("/out"))).unwrap();
        assert_eq!(paths.json, PathBuf::from("/out/ep01.json"));
        assert_eq!(paths.text, PathBuf::from("/out/ep01.txt"));
    }

    #[tokio::test]
    async fn test_process_file_writes_all_outputs() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("clip.wav");
        write_silence(input.path(), 2);
        let out = temp.child("out");

        let mut config = Config::default();
        config.output.write_json = true;
        config.output.write_text = true;

        let report = workflow(config, None)
            .process_file(input.path(), Some(out.path()), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.document.len(), 1);

        let srt = std::fs::read_to_string(out.child("clip.srt").path()).unwrap();
        assert!(srt.contains("00:00:00,200 --> 00:00:00,800"));
        assert!(srt.contains("テスト。"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.child("clip.json").path()).unwrap()).unwrap();
        assert_eq!(json["state"], "Done");
        assert_eq!(json["document"]["cues"][0]["text"], "テスト。");

        let text = std::fs::read_to_string(out.child("clip.txt").path()).unwrap();
        assert_eq!(text, "テスト。");
    }

    #[tokio::test]
    async fn test_batch_skips_non_media_and_records_failures() {
        let temp = TempDir::new().unwrap();
        write_silence(temp.child("a.wav").path(), 1);
        temp.child("nested").create_dir_all().unwrap();
        write_silence(temp.child("nested/b.wav").path(), 1);
        temp.child("broken.wav").write_str("not a wav file").unwrap();
        temp.child("readme.txt").write_str("ignore me").unwrap();
        let out = temp.child("subs");

        let summary = workflow(Config::default(), None)
            .process_directory(temp.path(), Some(out.path()), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].0.ends_with("broken.wav"));
        assert!(out.child("a.srt").path().exists());
        assert!(out.child("nested/b.srt").path().exists());
    }

    #[tokio::test]
    async fn test_translate_existing_srt() {
        let temp = TempDir::new().unwrap();
        let input = temp.child("in.srt");
        input
            .write_str("1\n00:00:01,000 --> 00:00:02,000\nこんにちは\n\n2\n00:00:03,000 --> 00:00:04,000\nさようなら\n")
            .unwrap();
        let output = temp.child("out.srt");

        let report = workflow(Config::default(), Some(echo_translator()))
            .translate_srt(input.path(), output.path(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.translation_misses(), 0);

        let srt = std::fs::read_to_string(output.path()).unwrap();
        assert!(srt.contains("こんにちは\nEN:こんにちは"));
        assert!(srt.contains("さようなら\nEN:さようなら"));
    }
}
