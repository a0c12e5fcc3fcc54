// Subtitle document model
//
// - Cue / SubtitleDocument: the pipeline's output, with invariant checks
// - assembler: greedy grouping of tokens into cues
// - srt: SRT writer and reader

pub mod assembler;
pub mod srt;

use serde::{Deserialize, Serialize};

pub use assembler::CueAssembler;
use crate::annotate::Annotation;
use crate::error::AssemblyError;
use crate::transcribe::Token;

const TOLERANCE: f64 = 1e-6;

/// One subtitle entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub tokens: Vec<Token>,
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Absent until annotated, or when annotation of this cue failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,
    /// Absent until translated, or when translation of this cue failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl Cue {
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        let start = tokens.iter().map(|t| t.start).fold(f64::INFINITY, f64::min);
        let end = tokens.iter().map(|t| t.end).fold(f64::NEG_INFINITY, f64::max);
        let text = render_text(&tokens);
        let (start, end) = if tokens.is_empty() { (0.0, 0.0) } else { (start, end) };
        Self { tokens, start, end, text, annotations: None, translation: None }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Kana reading line built from the annotations, if any
    pub fn reading(&self) -> Option<String> {
        let annotations = self.annotations.as_ref()?;
        Some(
            annotations
                .iter()
                .map(|a| if a.reading.is_empty() { a.surface.as_str() } else { a.reading.as_str() })
                .collect::<String>(),
        )
    }
}

/// Limits every cue of an assembled document must respect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CueLimits {
    pub max_duration: f64,
    pub max_chars: usize,
}

/// Ordered, non-overlapping cues
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtitleDocument {
    pub cues: Vec<Cue>,
}

impl SubtitleDocument {
    pub fn new(cues: Vec<Cue>) -> Self {
        Self { cues }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Check ordering, non-overlap and (when given) size limits
    pub fn verify(&self, limits: Option<CueLimits>) -> Result<(), AssemblyError> {
        for (index, cue) in self.cues.iter().enumerate() {
            if cue.text.trim().is_empty() {
                return Err(AssemblyError::EmptyCue { index });
            }
            if cue.end < cue.start {
                return Err(AssemblyError::InvertedSpan { index, start: cue.start, end: cue.end });
            }
            if let Some(limits) = limits {
                if cue.duration() > limits.max_duration + TOLERANCE {
                    return Err(AssemblyError::DurationExceeded {
                        index,
                        duration: cue.duration(),
                        max: limits.max_duration,
                    });
                }
                if cue.char_count() > limits.max_chars {
                    return Err(AssemblyError::LengthExceeded {
                        index,
                        chars: cue.char_count(),
                        max: limits.max_chars,
                    });
                }
            }
        }

        for (index, pair) in self.cues.windows(2).enumerate() {
            if pair[1].start < pair[0].start {
                return Err(AssemblyError::OutOfOrder {
                    index: index + 1,
                    start: pair[1].start,
                    previous_start: pair[0].start,
                });
            }
            if pair[0].end > pair[1].start + TOLERANCE {
                return Err(AssemblyError::Overlap { index, end: pair[0].end, next_start: pair[1].start });
            }
        }
        Ok(())
    }

    /// Cue texts as one transcript, sentences separated by 。
    pub fn plain_text(&self) -> String {
        let mut text = String::new();
        for cue in &self.cues {
            text.push_str(cue.text.trim());
            if !ends_sentence(&cue.text) {
                text.push('。');
            }
        }
        text
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Characters written without separating spaces (kana, kanji, full-width forms)
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F   // CJK symbols and punctuation
        | 0x3040..=0x30FF // hiragana, katakana
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xF900..=0xFAFF
        | 0xFF00..=0xFFEF // full-width and half-width forms
    )
}

pub fn ends_sentence(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('。' | '！' | '？' | '!' | '?' | '.'))
}

/// Append a token to rendered cue text, adding a space only between two non-CJK words
pub fn append_token(text: &mut String, token: &str) {
    let token = token.trim();
    if token.is_empty() {
        return;
    }
    let needs_space = match (text.chars().last(), token.chars().next()) {
        (Some(prev), Some(next)) => {
            !is_cjk(prev)
                && !is_cjk(next)
                && !prev.is_whitespace()
                && !matches!(next, ',' | '.' | '!' | '?' | ';' | ':' | ')' | '\'' | '"')
        }
        _ => false,
    };
    if needs_space {
        text.push(' ');
    }
    text.push_str(token);
}

pub fn render_text(tokens: &[Token]) -> String {
    let mut text = String::new();
    for token in tokens {
        append_token(&mut text, &token.text);
    }
    text
}
