use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::JimakuError;
use crate::quality::FilterReport;
use crate::subtitle::SubtitleDocument;

/// States of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Chunking,
    Transcribing,
    Assembling,
    Correcting,
    Annotating,
    Translating,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Stage-local failure that degraded the output without failing the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SoftFailure {
    ChunkTranscription {
        chunk_index: usize,
        start: f64,
        end: f64,
        error: String,
    },
    AnnotationMiss {
        cue_index: usize,
        /// Surface token whose lookup failed; absent when the whole cue failed
        token: Option<String>,
        error: String,
    },
    /// The cue keeps its recognized text
    CorrectionMiss {
        cue_index: usize,
        error: String,
    },
    TranslationMiss {
        cue_index: usize,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: RunState,
    pub elapsed_ms: u128,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: RunState,
    pub transitions: Vec<RunState>,
    pub document: SubtitleDocument,
    pub soft_failures: Vec<SoftFailure>,
    pub filter: FilterReport,
    pub timings: Vec<StageTiming>,
}

impl RunReport {
    pub fn failed_chunks(&self) -> usize {
        self.count(|f| matches!(f, SoftFailure::ChunkTranscription { .. }))
    }

    pub fn annotation_misses(&self) -> usize {
        self.count(|f| matches!(f, SoftFailure::AnnotationMiss { .. }))
    }

    pub fn correction_misses(&self) -> usize {
        self.count(|f| matches!(f, SoftFailure::CorrectionMiss { .. }))
    }

    pub fn translation_misses(&self) -> usize {
        self.count(|f| matches!(f, SoftFailure::TranslationMiss { .. }))
    }

    fn count(&self, predicate: impl Fn(&SoftFailure) -> bool) -> usize {
        self.soft_failures.iter().filter(|f| predicate(f)).count()
    }
}

/// Collects state transitions, timings and soft failures while a run executes
pub struct RunTracker {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    state: RunState,
    transitions: Vec<RunState>,
    stage_clock: Instant,
    timings: Vec<StageTiming>,
    soft_failures: Vec<SoftFailure>,
    filter: FilterReport,
}

impl RunTracker {
    pub fn new(run_id: Uuid) -> Self {
        Self::starting_at(run_id, RunState::Chunking)
    }

    /// Tracker for a run that skips the stages before `state`
    pub fn starting_at(run_id: Uuid, state: RunState) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            state,
            transitions: vec![state],
            stage_clock: Instant::now(),
            timings: Vec::new(),
            soft_failures: Vec::new(),
            filter: FilterReport::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    pub fn enter(&mut self, next: RunState) {
        info!("Run {}: {:?} -> {:?}", self.run_id, self.state, next);
        self.state = next;
        self.transitions.push(next);
        self.stage_clock = Instant::now();
    }

    /// Close the timing of the current sequential stage
    pub fn complete_stage(&mut self) {
        let elapsed = self.stage_clock.elapsed();
        self.record_timing(self.state, elapsed);
    }

    pub fn record_timing(&mut self, stage: RunState, elapsed: Duration) {
        self.timings.push(StageTiming { stage, elapsed_ms: elapsed.as_millis() });
    }

    pub fn record(&mut self, failure: SoftFailure) {
        self.soft_failures.push(failure);
    }

    pub fn set_filter_report(&mut self, filter: FilterReport) {
        self.filter = filter;
    }

    pub fn soft_failures(&self) -> &[SoftFailure] {
        &self.soft_failures
    }

    pub fn fail(&mut self, error: &JimakuError) {
        error!("Run {} failed in {:?} ({}): {}", self.run_id, self.state, error.kind(), error);
        self.enter(RunState::Failed);
    }

    pub fn finish(mut self, document: SubtitleDocument) -> RunReport {
        self.enter(RunState::Done);
        info!(
            "Run {} done: {} cues, {} soft failures",
            self.run_id,
            document.len(),
            self.soft_failures.len()
        );
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            state: self.state,
            transitions: self.transitions,
            document,
            soft_failures: self.soft_failures,
            filter: self.filter,
            timings: self.timings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_records_transitions() {
        let mut tracker = RunTracker::new(Uuid::new_v4());
        tracker.complete_stage();
        tracker.enter(RunState::Transcribing);
        tracker.record(SoftFailure::ChunkTranscription {
            chunk_index: 1,
            start: 28.0,
            end: 40.0,
            error: "bad frame".to_string(),
        });
        tracker.complete_stage();

        let report = tracker.finish(SubtitleDocument::default());
        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.transitions, vec![RunState::Chunking, RunState::Transcribing, RunState::Done]);
        assert_eq!(report.timings.len(), 2);
        assert_eq!(report.failed_chunks(), 1);
        assert_eq!(report.translation_misses(), 0);
    }

    #[test]
    fn test_tracker_can_start_mid_pipeline() {
        let tracker = RunTracker::starting_at(Uuid::new_v4(), RunState::Assembling);
        let report = tracker.finish(SubtitleDocument::default());
        assert_eq!(report.transitions, vec![RunState::Assembling, RunState::Done]);
    }

    #[test]
    fn test_fail_enters_failed_state() {
        let mut tracker = RunTracker::new(Uuid::new_v4());
        tracker.fail(&JimakuError::Cancelled);
        assert_eq!(tracker.state(), RunState::Failed);
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn test_soft_failure_serializes_with_kind() {
        let failure = SoftFailure::TranslationMiss { cue_index: 2, attempts: 3, error: "429".to_string() };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "TranslationMiss");
        assert_eq!(json["attempts"], 3);
    }
}
