use tracing::{debug, info};

use super::{append_token, ends_sentence, Cue, CueLimits, SubtitleDocument};
use crate::config::CueConfig;
use crate::error::AssemblyError;
use crate::transcribe::Token;

/// Greedy grouping of a merged token stream into subtitle cues
#[derive(Debug, Clone)]
pub struct CueAssembler {
    max_duration: f64,
    max_chars: usize,
    silence_gap: f64,
    break_on_sentence_end: bool,
}

impl CueAssembler {
    pub fn new(config: &CueConfig) -> Self {
        Self {
            max_duration: config.max_cue_duration,
            max_chars: config.max_cue_chars.max(1),
            silence_gap: config.silence_gap_threshold,
            break_on_sentence_end: config.break_on_sentence_end,
        }
    }

    pub fn limits(&self) -> CueLimits {
        CueLimits { max_duration: self.max_duration, max_chars: self.max_chars }
    }

    /// Assemble cues and verify the document before returning it.
    ///
    /// The input must be ordered by start time; an out-of-order stream is
    /// rejected rather than re-sorted.
    pub fn assemble(&self, tokens: &[Token]) -> Result<SubtitleDocument, AssemblyError> {
        if let Some(position) = tokens.windows(2).position(|pair| pair[1].start < pair[0].start) {
            return Err(AssemblyError::UnorderedTokens { position: position + 1 });
        }

        let mut cues = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut current_text = String::new();

        for token in tokens.iter().flat_map(|t| self.split_oversized(t)) {
            if let Some(first) = current.first() {
                let last_end = current.last().map(|t| t.end).unwrap_or(first.end);
                let mut candidate_text = current_text.clone();
                append_token(&mut candidate_text, &token.text);

                let gap = token.start - last_end;
                let duration = token.end - first.start;
                let close = gap > self.silence_gap
                    || duration > self.max_duration
                    || candidate_text.chars().count() > self.max_chars;

                if close {
                    cues.push(Cue::from_tokens(std::mem::take(&mut current)));
                    current_text.clear();
                }
            }

            append_token(&mut current_text, &token.text);
            let sentence_end = self.break_on_sentence_end && ends_sentence(&token.text);
            current.push(token);

            if sentence_end {
                cues.push(Cue::from_tokens(std::mem::take(&mut current)));
                current_text.clear();
            }
        }
        if !current.is_empty() {
            cues.push(Cue::from_tokens(current));
        }

        let document = SubtitleDocument::new(cues);
        document.verify(Some(self.limits()))?;
        info!("Assembled {} cues from {} tokens", document.len(), tokens.len());
        Ok(document)
    }

    /// Split a token that alone breaks a limit into evenly timed pieces
    fn split_oversized(&self, token: &Token) -> Vec<Token> {
        let text = token.text.trim();
        let chars: Vec<char> = text.chars().collect();
        let duration = token.duration().max(0.0);

        let by_chars = chars.len().div_ceil(self.max_chars);
        let by_duration = if self.max_duration > 0.0 {
            (duration / self.max_duration).ceil() as usize
        } else {
            1
        };
        let wanted = by_chars.max(by_duration).max(1);
        if wanted == 1 {
            return vec![token.clone()];
        }

        // A piece cannot be smaller than one character
        let pieces = wanted.min(chars.len()).max(1);
        debug!(
            "Splitting oversized token '{}' ({:.2}s, {} chars) into {} pieces",
            text,
            duration,
            chars.len(),
            pieces
        );

        let per_piece = chars.len() / pieces;
        let remainder = chars.len() % pieces;
        let step = duration / pieces as f64;

        let mut offset = 0;
        (0..pieces)
            .map(|i| {
                let len = per_piece + usize::from(i < remainder);
                let piece: String = chars[offset..offset + len].iter().collect();
                offset += len;

                let start = token.start + step * i as f64;
                let end = if i + 1 == pieces { token.end } else { token.start + step * (i + 1) as f64 };
                let end = end.min(start + self.max_duration);
                Token { text: piece, start, end, confidence: token.confidence }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(max_duration: f64, max_chars: usize, gap: f64) -> CueAssembler {
        CueAssembler::new(&CueConfig {
            max_cue_duration: max_duration,
            max_cue_chars: max_chars,
            silence_gap_threshold: gap,
            break_on_sentence_end: true,
        })
    }

    fn tok(text: &str, start: f64, end: f64) -> Token {
        Token::new(text, start, end, 0.9)
    }

    fn assert_invariants(doc: &SubtitleDocument, max_duration: f64, max_chars: usize) {
        for pair in doc.cues.windows(2) {
            assert!(pair[0].start <= pair[1].start);
            assert!(pair[0].end <= pair[1].start);
        }
        for cue in &doc.cues {
            assert!(cue.duration() <= max_duration + 1e-6, "cue too long: {:?}", cue);
            assert!(cue.char_count() <= max_chars, "cue too wide: {:?}", cue);
        }
    }

    #[test]
    fn test_silence_gap_closes_cue() {
        let tokens = vec![tok("こんにちは", 0.0, 0.8), tok("世界", 0.9, 1.3), tok("また", 3.0, 3.4), tok("ね", 3.4, 3.6)];
        let doc = assembler(7.0, 32, 0.8).assemble(&tokens).unwrap();

        assert_eq!(doc.len(), 2);
        assert_eq!(doc.cues[0].text, "こんにちは世界");
        assert_eq!(doc.cues[1].text, "またね");
        assert_eq!(doc.cues[1].start, 3.0);
        assert_eq!(doc.cues[1].end, 3.6);
    }

    #[test]
    fn test_duration_limit_closes_cue() {
        let tokens: Vec<Token> = (0..10).map(|i| tok("あ", i as f64, i as f64 + 0.9)).collect();
        let doc = assembler(3.0, 32, 0.8).assemble(&tokens).unwrap();

        assert_invariants(&doc, 3.0, 32);
        assert_eq!(doc.cues[0].tokens.len(), 3);
    }

    #[test]
    fn test_char_limit_closes_cue() {
        let tokens: Vec<Token> = (0..6).map(|i| tok("ですね", i as f64 * 0.5, i as f64 * 0.5 + 0.5)).collect();
        let doc = assembler(7.0, 7, 0.8).assemble(&tokens).unwrap();

        assert_invariants(&doc, 7.0, 7);
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.cues[0].text, "ですねですね");
    }

    #[test]
    fn test_sentence_end_closes_cue() {
        let tokens = vec![tok("はい", 0.0, 0.4), tok("。", 0.4, 0.5), tok("次", 0.5, 0.8)];
        let doc = assembler(7.0, 32, 0.8).assemble(&tokens).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.cues[0].text, "はい。");
    }

    #[test]
    fn test_oversized_token_is_split_not_truncated() {
        let long = "あいうえおかきくけこさしす";
        let doc = assembler(2.0, 5, 0.8).assemble(&[tok(long, 0.0, 6.0)]).unwrap();

        assert_invariants(&doc, 2.0, 5);
        let joined: String = doc.cues.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, long);
        assert_eq!(doc.cues.first().unwrap().start, 0.0);
        assert_eq!(doc.cues.last().unwrap().end, 6.0);
    }

    #[test]
    fn test_single_char_long_token_is_clamped() {
        let doc = assembler(2.0, 32, 0.8).assemble(&[tok("あ", 0.0, 5.0)]).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.cues[0].end, 2.0);
    }

    #[test]
    fn test_unordered_input_is_rejected() {
        let tokens = vec![tok("b", 2.0, 2.5), tok("a", 1.0, 1.5)];
        let err = assembler(7.0, 32, 0.8).assemble(&tokens).unwrap_err();
        assert_eq!(err, AssemblyError::UnorderedTokens { position: 1 });
    }

    #[test]
    fn test_overlapping_input_fails_verification() {
        let tokens = vec![tok("そう。", 0.0, 3.0), tok("ね", 1.0, 1.5)];
        let err = assembler(7.0, 32, 0.8).assemble(&tokens).unwrap_err();
        assert!(matches!(err, AssemblyError::Overlap { index: 0, .. }));
    }

    #[test]
    fn test_empty_stream_gives_empty_document() {
        let doc = assembler(7.0, 32, 0.8).assemble(&[]).unwrap();
        assert!(doc.is_empty());
    }
}
