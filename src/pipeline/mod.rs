// Pipeline orchestration
//
// Chunking -> Transcribing -> Assembling -> [Correcting] -> Annotating / Translating -> Done
//
// Transcription fans out one task per chunk and joins before assembly.
// Correction, when enabled, rewrites cue text before anything reads it.
// Annotation and translation fan out one task per cue and run side by side.
// Only invalid input, all chunks failing, an assembly violation or
// cancellation fail the run; everything else is recorded as a soft failure.

pub mod cancel;
pub mod report;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use cancel::CancelToken;
pub use report::{RunReport, RunState, RunTracker, SoftFailure, StageTiming};
use crate::annotate::{AnnotatedText, Annotator, AnnotatorFactory};
use crate::audio::{AudioBuffer, AudioChunk, AudioInput, Chunker};
use crate::config::Config;
use crate::error::{BackendError, JimakuError, Result, TranscriptionError};
use crate::quality::TranscriptFilter;
use crate::subtitle::{CueAssembler, SubtitleDocument};
use crate::transcribe::{merge_chunks, ChunkTranscript, TranscriberFactory, TranscriptionEngine};
use crate::translate::{prompt, CueTranslator, TranslationFailure, TranslatorFactory};

/// Stages wired together for repeated runs
pub struct Pipeline {
    config: Config,
    chunker: Chunker,
    engine: TranscriptionEngine,
    filter: TranscriptFilter,
    assembler: CueAssembler,
    annotator: Option<Arc<Annotator>>,
    corrector: Option<CueTranslator>,
    translator: Option<CueTranslator>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        engine: TranscriptionEngine,
        annotator: Option<Arc<Annotator>>,
        translator: Option<CueTranslator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunker: Chunker::from_config(&config.chunker)?,
            filter: TranscriptFilter::new(&config.quality),
            assembler: CueAssembler::new(&config.cues),
            config,
            engine,
            annotator,
            corrector: None,
            translator,
        })
    }

    /// Enable LLM cleanup of cue text ahead of annotation and translation
    pub fn with_corrector(mut self, corrector: CueTranslator) -> Self {
        self.corrector = Some(corrector);
        self
    }

    /// Build every stage from configuration; disabled stages are left out
    pub async fn from_config(config: &Config) -> Result<Self> {
        let engine = TranscriberFactory::create_engine(&config.transcriber);

        let annotator = if config.annotate.enabled {
            Some(Arc::new(AnnotatorFactory::create(&config.annotate).await?))
        } else {
            None
        };

        if config.translate.enabled || config.correct.enabled {
            TranslatorFactory::check_availability(&config.translate).await?;
        }
        let translator = if config.translate.enabled {
            Some(TranslatorFactory::create_translator(&config.translate)?)
        } else {
            None
        };

        let pipeline = Self::new(config.clone(), engine, annotator, translator)?;
        if config.correct.enabled {
            Ok(pipeline.with_corrector(TranslatorFactory::create_translator(&config.translate)?))
        } else {
            Ok(pipeline)
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run on an already decoded buffer
    pub async fn run(&self, audio: AudioBuffer, cancel: &CancelToken) -> Result<RunReport> {
        self.run_tracked(Ok(audio), cancel).await
    }

    /// Run on raw PCM bytes; decoding errors fail the run as invalid audio
    pub async fn run_input(&self, input: AudioInput, cancel: &CancelToken) -> Result<RunReport> {
        self.run_tracked(input.decode(), cancel).await
    }

    /// Annotate and translate an already assembled document, e.g. one read from SRT
    pub async fn enrich_document(&self, document: SubtitleDocument, cancel: &CancelToken) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);

        async move {
            let mut tracker = RunTracker::starting_at(run_id, RunState::Assembling);
            let mut document = document;
            let outcome = match document.verify(None) {
                Ok(()) => self.enrich(&mut document, cancel, &mut tracker).await,
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(()) => Ok(tracker.finish(document)),
                Err(e) => {
                    tracker.fail(&e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_tracked(&self, audio: Result<AudioBuffer>, cancel: &CancelToken) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);

        async move {
            let mut tracker = RunTracker::new(run_id);
            match self.execute(audio, cancel, &mut tracker).await {
                Ok(document) => Ok(tracker.finish(document)),
                Err(e) => {
                    tracker.fail(&e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        audio: Result<AudioBuffer>,
        cancel: &CancelToken,
        tracker: &mut RunTracker,
    ) -> Result<SubtitleDocument> {
        // Chunking
        let audio = audio?;
        if audio.sample_rate == 0 || audio.samples.is_empty() {
            return Err(JimakuError::InvalidAudio(format!(
                "{} samples at {} Hz",
                audio.samples.len(),
                audio.sample_rate
            )));
        }
        let audio = audio.resample(self.config.audio.target_sample_rate);
        let chunks = self.chunker.chunk(&audio)?;
        tracker.complete_stage();
        check_cancelled(cancel)?;

        tracker.enter(RunState::Transcribing);
        let transcripts = self.transcribe(chunks, cancel, tracker).await?;
        tracker.complete_stage();

        tracker.enter(RunState::Assembling);
        let merged = merge_chunks(&transcripts, self.config.chunker.overlap_policy);
        let (tokens, filter_report) = self.filter.apply(merged);
        tracker.set_filter_report(filter_report);
        let mut document = self.assembler.assemble(&tokens)?;
        tracker.complete_stage();
        check_cancelled(cancel)?;

        self.enrich(&mut document, cancel, tracker).await?;
        Ok(document)
    }

    async fn transcribe(
        &self,
        chunks: Vec<AudioChunk>,
        cancel: &CancelToken,
        tracker: &mut RunTracker,
    ) -> Result<Vec<ChunkTranscript>> {
        let total = chunks.len();
        info!("Transcribing {} chunks", total);

        let chunks = Arc::new(chunks);
        let engine = self.engine.clone();

        // The engine's model semaphore bounds how many of these reach the model
        let joined = fan_out(total, total, |i| {
            let engine = engine.clone();
            let chunks = chunks.clone();
            async move { engine.transcribe_chunk(&chunks[i]).await }
        });

        let results = tokio::select! {
            _ = cancel.cancelled() => None,
            results = joined => Some(results),
        };
        let results = results.ok_or(JimakuError::Cancelled)?;

        let mut transcripts = Vec::with_capacity(total);
        for (chunk, result) in chunks.iter().zip(results) {
            let result = result.unwrap_or_else(|| {
                Err(TranscriptionError::DecodeFailure("transcription task aborted".to_string()))
            });
            match result {
                Ok(transcript) => transcripts.push(transcript),
                Err(error) => {
                    warn!("Chunk {} failed, substituting an empty placeholder: {}", chunk.index, error);
                    tracker.record(SoftFailure::ChunkTranscription {
                        chunk_index: chunk.index,
                        start: chunk.start,
                        end: chunk.end(),
                        error: error.to_string(),
                    });
                    transcripts.push(ChunkTranscript::placeholder(chunk, error));
                }
            }
        }

        if transcripts.iter().all(ChunkTranscript::is_placeholder) {
            return Err(JimakuError::TranscriptionExhausted(total));
        }
        Ok(transcripts)
    }

    /// Replace cue text with the corrector's reply. A failed reply, or one
    /// longer than the cue limit allows, keeps the recognized text.
    async fn correct(
        &self,
        corrector: CueTranslator,
        document: &mut SubtitleDocument,
        cancel: &CancelToken,
        tracker: &mut RunTracker,
    ) -> Result<()> {
        tracker.enter(RunState::Correcting);
        let texts: Arc<Vec<String>> = Arc::new(document.cues.iter().map(|c| c.text.clone()).collect());
        let window = self.config.translate.translation_context_window;

        let corrections = fan_out(texts.len(), self.config.pipeline.translation_concurrency, move |i| {
            let corrector = corrector.clone();
            let context = prompt::context_window(&texts, i, window);
            let texts = texts.clone();
            async move { corrector.correct_cue(&texts[i], &context).await }
        });
        let slots = tokio::select! {
            _ = cancel.cancelled() => return Err(JimakuError::Cancelled),
            slots = corrections => slots,
        };

        for (index, (cue, slot)) in document.cues.iter_mut().zip(slots).enumerate() {
            // Cues read from SRT may already exceed the limit
            let limit = self.config.cues.max_cue_chars.max(cue.char_count());
            let outcome = match slot {
                Some(Ok(text)) if text.chars().count() > limit => Err(format!(
                    "correction '{}' has {} characters, limit is {}",
                    text,
                    text.chars().count(),
                    limit
                )),
                Some(Ok(text)) => Ok(text),
                Some(Err(failure)) => Err(failure.error.to_string()),
                None => Err("correction task aborted".to_string()),
            };
            match outcome {
                Ok(text) => {
                    if text != cue.text {
                        debug!("Cue {} corrected: '{}' -> '{}'", index, cue.text, text);
                    }
                    cue.text = text;
                }
                Err(error) => {
                    warn!("Keeping recognized text of cue {}: {}", index, error);
                    tracker.record(SoftFailure::CorrectionMiss { cue_index: index, error });
                }
            }
        }

        tracker.complete_stage();
        Ok(())
    }

    /// Correct, then annotate and translate every cue; the last two run side by side
    async fn enrich(
        &self,
        document: &mut SubtitleDocument,
        cancel: &CancelToken,
        tracker: &mut RunTracker,
    ) -> Result<()> {
        if document.is_empty() {
            return Ok(());
        }
        if let Some(corrector) = self.corrector.clone() {
            self.correct(corrector, document, cancel, tracker).await?;
        }
        if self.annotator.is_none() && self.translator.is_none() {
            return Ok(());
        }

        let texts: Arc<Vec<String>> = Arc::new(document.cues.iter().map(|c| c.text.clone()).collect());
        let count = texts.len();

        let annotation = match self.annotator.clone() {
            Some(annotator) => {
                tracker.enter(RunState::Annotating);
                let texts = texts.clone();
                Some(timed(fan_out(count, self.config.pipeline.worker_concurrency, move |i| {
                    let annotator = annotator.clone();
                    let texts = texts.clone();
                    async move { annotator.annotate(&texts[i]).await }
                })))
            }
            None => None,
        };

        let translation = match self.translator.clone() {
            Some(translator) => {
                tracker.enter(RunState::Translating);
                let texts = texts.clone();
                let window = self.config.translate.translation_context_window;
                Some(timed(fan_out(count, self.config.pipeline.translation_concurrency, move |i| {
                    let translator = translator.clone();
                    let context = prompt::context_window(&texts, i, window);
                    let texts = texts.clone();
                    async move { translator.translate_cue(&texts[i], &context).await }
                })))
            }
            None => None,
        };

        let stages = async { tokio::join!(optional(annotation), optional(translation)) };
        let (annotated, translated) = tokio::select! {
            _ = cancel.cancelled() => return Err(JimakuError::Cancelled),
            done = stages => done,
        };

        if let Some((slots, elapsed)) = annotated {
            tracker.record_timing(RunState::Annotating, elapsed);
            for (index, (cue, slot)) in document.cues.iter_mut().zip(slots).enumerate() {
                let result = slot.unwrap_or_else(|| Err(JimakuError::Annotation("annotation task aborted".to_string())));
                match result {
                    Ok(AnnotatedText { annotations, lookup_failures }) => {
                        for failure in lookup_failures {
                            tracker.record(SoftFailure::AnnotationMiss {
                                cue_index: index,
                                token: Some(failure.surface),
                                error: failure.error,
                            });
                        }
                        cue.annotations = Some(annotations);
                    }
                    Err(e) => {
                        warn!("Annotation of cue {} failed: {}", index, e);
                        tracker.record(SoftFailure::AnnotationMiss { cue_index: index, token: None, error: e.to_string() });
                    }
                }
            }
        }

        if let Some((slots, elapsed)) = translated {
            tracker.record_timing(RunState::Translating, elapsed);
            for (index, (cue, slot)) in document.cues.iter_mut().zip(slots).enumerate() {
                let result = slot.unwrap_or_else(|| {
                    Err(TranslationFailure {
                        attempts: 0,
                        error: BackendError::Transient("translation task aborted".to_string()),
                    })
                });
                match result {
                    Ok(translation) => cue.translation = Some(translation),
                    Err(failure) => tracker.record(SoftFailure::TranslationMiss {
                        cue_index: index,
                        attempts: failure.attempts,
                        error: failure.error.to_string(),
                    }),
                }
            }
        }

        Ok(())
    }
}

fn check_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() { Err(JimakuError::Cancelled) } else { Ok(()) }
}

async fn optional<F: Future>(stage: Option<F>) -> Option<F::Output> {
    match stage {
        Some(stage) => Some(stage.await),
        None => None,
    }
}

/// Await a stage future and report how long it took
async fn timed<T>(stage: impl Future<Output = T>) -> (T, std::time::Duration) {
    let started = Instant::now();
    let output = stage.await;
    (output, started.elapsed())
}

/// Spawn `count` tasks built by `make`, at most `limit` running at once.
///
/// Results come back in index order; a slot is `None` when its task panicked
/// or was aborted. Dropping the returned future aborts every task.
fn fan_out<T, F, Fut>(count: usize, limit: usize, mut make: F) -> impl Future<Output = Vec<Option<T>>>
where
    T: Send + 'static,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    for index in 0..count {
        let permits = permits.clone();
        let task = make(index);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            (index, task.await)
        });
    }

    async move {
        let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(value),
                Err(e) => warn!("Pipeline task did not complete: {}", e),
            }
        }
        slots
    }
}
