//! Merging of per-chunk token streams into one global stream.
//!
//! Consecutive chunks share an overlap window, so words spoken inside it are
//! usually recognized twice. For every boundary one chunk is chosen as the
//! owner of the window; tokens of the other chunk whose midpoint falls inside
//! the window are dropped. The result is then sorted, adjacent duplicates are
//! collapsed and token ends are clamped so the stream is non-overlapping.

use tracing::debug;

use super::{ChunkTranscript, Token};
use crate::config::OverlapPolicy;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Earlier,
    Later,
}

/// Pick which side of a boundary keeps the overlap window
fn overlap_owner(earlier: &ChunkTranscript, later: &ChunkTranscript, overlap: f64, policy: OverlapPolicy) -> Owner {
    // A placeholder has nothing to offer; let the transcribed side keep the window
    match (earlier.is_placeholder(), later.is_placeholder()) {
        (true, false) => return Owner::Later,
        (false, true) => return Owner::Earlier,
        _ => {}
    }

    match policy {
        OverlapPolicy::PreferEarlier => Owner::Earlier,
        OverlapPolicy::PreferLater => Owner::Later,
        OverlapPolicy::SmallerRelativeOverlap => {
            let earlier_share = overlap / earlier.duration.max(EPSILON);
            let later_share = overlap / later.duration.max(EPSILON);
            if later_share + EPSILON < earlier_share {
                Owner::Later
            } else {
                Owner::Earlier
            }
        }
    }
}

/// Merge chunk transcripts (in chunk order) into one deduplicated stream
pub fn merge_chunks(transcripts: &[ChunkTranscript], policy: OverlapPolicy) -> Vec<Token> {
    // Windows each chunk has to give up: (from, to) with from inclusive, to exclusive
    let mut ceded: Vec<Vec<(f64, f64)>> = vec![Vec::new(); transcripts.len()];

    for (i, pair) in transcripts.windows(2).enumerate() {
        let (earlier, later) = (&pair[0], &pair[1]);
        let from = later.start;
        let to = earlier.end();
        if to <= from {
            continue;
        }
        match overlap_owner(earlier, later, to - from, policy) {
            Owner::Earlier => ceded[i + 1].push((from, to)),
            Owner::Later => ceded[i].push((from, to)),
        }
    }

    let mut tokens = Vec::new();
    for (transcript, windows) in transcripts.iter().zip(&ceded) {
        let before = tokens.len();
        tokens.extend(transcript.tokens.iter().filter(|token| {
            let mid = token.midpoint();
            !windows.iter().any(|&(from, to)| mid >= from && mid < to)
        }).cloned());
        debug!(
            "Chunk {} kept {}/{} tokens after overlap filtering",
            transcript.chunk_index,
            tokens.len() - before,
            transcript.tokens.len()
        );
    }

    normalize_stream(tokens)
}

/// Sort, collapse duplicates, and clamp ends so that no token overlaps the next.
///
/// Applying this twice yields the same stream as applying it once.
pub fn normalize_stream(mut tokens: Vec<Token>) -> Vec<Token> {
    tokens.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut tokens = collapse_duplicates(tokens);

    for i in 1..tokens.len() {
        let next_start = tokens[i].start;
        let previous = &mut tokens[i - 1];
        if previous.end > next_start {
            previous.end = next_start.max(previous.start);
        }
    }
    tokens
}

/// Drop a token when it repeats the previous kept token's text over an overlapping span
pub fn collapse_duplicates(tokens: Vec<Token>) -> Vec<Token> {
    let mut kept: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Some(last) = kept.last_mut() {
            let same_text = normalize_text(&last.text) == normalize_text(&token.text);
            if same_text && token.start < last.end {
                if token.confidence > last.confidence {
                    last.confidence = token.confidence;
                }
                continue;
            }
        }
        kept.push(token);
    }
    kept
}

fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranscriptionError;

    fn transcript(index: usize, start: f64, duration: f64, tokens: Vec<Token>) -> ChunkTranscript {
        ChunkTranscript { chunk_index: index, start, duration, tokens, failure: None }
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    fn forty_second_case() -> Vec<ChunkTranscript> {
        vec![
            transcript(0, 0.0, 30.0, vec![
                Token::new("今日", 26.0, 27.0, 0.9),
                Token::new("は", 28.2, 28.6, 0.7),
                Token::new("晴れ", 29.0, 29.8, 0.7),
            ]),
            transcript(1, 28.0, 12.0, vec![
                Token::new("は", 28.3, 28.7, 0.95),
                Token::new("晴れ", 29.1, 29.9, 0.95),
                Token::new("です", 30.2, 30.8, 0.9),
            ]),
        ]
    }

    #[test]
    fn test_overlap_keeps_smaller_relative_chunk() {
        let merged = merge_chunks(&forty_second_case(), OverlapPolicy::SmallerRelativeOverlap);
        assert_eq!(texts(&merged), vec!["今日", "は", "晴れ", "です"]);
        // chunk 0 (2/30 overlap) wins over chunk 1 (2/12)
        assert_eq!(merged[1].start, 28.2);
        assert_eq!(merged[2].start, 29.0);
    }

    #[test]
    fn test_prefer_later_policy() {
        let merged = merge_chunks(&forty_second_case(), OverlapPolicy::PreferLater);
        assert_eq!(texts(&merged), vec!["今日", "は", "晴れ", "です"]);
        assert_eq!(merged[1].start, 28.3);
    }

    #[test]
    fn test_equal_sized_chunks_keep_earlier() {
        let chunks = vec![
            transcript(0, 0.0, 10.0, vec![Token::new("a", 9.2, 9.6, 0.5)]),
            transcript(1, 8.0, 10.0, vec![Token::new("a", 9.3, 9.7, 0.9), Token::new("b", 12.0, 12.5, 0.9)]),
        ];
        let merged = merge_chunks(&chunks, OverlapPolicy::SmallerRelativeOverlap);
        assert_eq!(texts(&merged), vec!["a", "b"]);
        assert_eq!(merged[0].start, 9.2);
    }

    #[test]
    fn test_failed_neighbor_cedes_overlap() {
        let mut chunks = forty_second_case();
        chunks[0] = ChunkTranscript::placeholder(
            &crate::audio::AudioChunk { index: 0, start: 0.0, duration: 30.0, sample_rate: 16_000, samples: vec![] },
            TranscriptionError::DecodeFailure("boom".to_string()),
        );
        let merged = merge_chunks(&chunks, OverlapPolicy::SmallerRelativeOverlap);
        assert_eq!(texts(&merged), vec!["は", "晴れ", "です"]);
    }

    #[test]
    fn test_output_is_ordered_and_non_overlapping() {
        let chunks = vec![transcript(0, 0.0, 10.0, vec![
            Token::new("b", 2.0, 3.5, 0.9),
            Token::new("a", 1.0, 2.5, 0.9),
            Token::new("c", 3.0, 4.0, 0.9),
        ])];
        let merged = merge_chunks(&chunks, OverlapPolicy::SmallerRelativeOverlap);
        assert_eq!(texts(&merged), vec!["a", "b", "c"]);
        for pair in merged.windows(2) {
            assert!(pair[0].end <= pair[1].start);
            assert!(pair[0].start <= pair[0].end);
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge_chunks(&forty_second_case(), OverlapPolicy::SmallerRelativeOverlap);
        let again = merge_chunks(&[transcript(0, 0.0, 40.0, once.clone())], OverlapPolicy::SmallerRelativeOverlap);
        assert_eq!(once, again);
        assert_eq!(normalize_stream(once.clone()), once);
    }

    #[test]
    fn test_collapse_overlapping_duplicates() {
        let tokens = vec![
            Token::new("ね", 1.0, 1.4, 0.4),
            Token::new("ね", 1.2, 1.5, 0.8),
            Token::new("ね", 2.0, 2.3, 0.8),
        ];
        let collapsed = collapse_duplicates(tokens);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].confidence, 0.8);
    }
}
