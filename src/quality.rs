use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::QualityConfig;
use crate::transcribe::Token;

/// What the filter removed from a token stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub low_confidence: usize,
    pub markers: usize,
    pub repeats: usize,
    /// Spans (start, end) where a hallucination loop was cut
    pub hallucination_periods: Vec<(f64, f64)>,
}

impl FilterReport {
    pub fn total(&self) -> usize {
        self.low_confidence + self.markers + self.repeats
    }

    pub fn has_hallucinations(&self) -> bool {
        !self.hallucination_periods.is_empty()
    }
}

/// Removes recognizer artifacts before cue assembly
pub struct TranscriptFilter {
    min_confidence: f32,
    max_repeats: usize,
    drop_markers: bool,
}

impl TranscriptFilter {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            max_repeats: config.max_repeats,
            drop_markers: config.drop_markers,
        }
    }

    pub fn apply(&self, tokens: Vec<Token>) -> (Vec<Token>, FilterReport) {
        let mut report = FilterReport::default();
        let mut kept: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut run_len = 0usize;
        let mut cut_span: Option<(f64, f64)> = None;

        for token in tokens {
            if token.confidence < self.min_confidence {
                report.low_confidence += 1;
                continue;
            }
            if self.drop_markers && is_non_speech_marker(&token.text) {
                report.markers += 1;
                continue;
            }

            let repeats_last = kept
                .last()
                .map(|last| normalize(&last.text) == normalize(&token.text))
                .unwrap_or(false);
            if repeats_last {
                run_len += 1;
            } else {
                if let Some(span) = cut_span.take() {
                    report.hallucination_periods.push(span);
                }
                run_len = 1;
            }

            if self.max_repeats > 0 && run_len > self.max_repeats {
                report.repeats += 1;
                let span = cut_span.get_or_insert((token.start, token.end));
                span.1 = token.end;
                continue;
            }
            kept.push(token);
        }
        if let Some(span) = cut_span {
            report.hallucination_periods.push(span);
        }

        if report.has_hallucinations() {
            warn!(
                "Cut {} repeated tokens in {} hallucination loops",
                report.repeats,
                report.hallucination_periods.len()
            );
        }
        if report.total() > 0 {
            info!(
                "Transcript filter removed {} tokens ({} low confidence, {} markers, {} repeats)",
                report.total(),
                report.low_confidence,
                report.markers,
                report.repeats
            );
        }

        (kept, report)
    }
}

/// Bracketed non-speech annotations such as [音楽], (拍手), [BLANK_AUDIO], ♪♪
pub fn is_non_speech_marker(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().all(|c| matches!(c, '♪' | '♫' | '♬' | '～' | '~')) {
        return true;
    }
    const PAIRS: [(char, char); 5] = [('[', ']'), ('(', ')'), ('（', '）'), ('【', '】'), ('<', '>')];
    let first = trimmed.chars().next();
    let last = trimmed.chars().last();
    PAIRS.iter().any(|&(open, close)| first == Some(open) && last == Some(close))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
