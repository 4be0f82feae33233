//! Overlapping window chunker.
//!
//! Splits extracted [`Segment`]s into [`Chunk`]s of roughly `chunk_size`
//! characters, with consecutive chunks sharing `chunk_overlap_ratio` of their
//! length so a sentence cut at a boundary still appears whole in one chunk.
//!
//! # Algorithm
//!
//! 1. Walk each segment independently; chunks never span two segments, so a
//!    chunk from a PDF carries exactly one page number.
//! 2. Take a window of `chunk_size` characters starting at the cursor.
//! 3. If the window ends mid-word before the end of the segment, pull its end back
//!    to the last whitespace in the second half of the window.
//! 4. Emit the trimmed window with its character offsets.
//! 5. Move the cursor to `end - overlap`, then forward to the start of the
//!    next word, always making progress.
//!
//! Chunk IDs are `<document id>-<index>` and the hash is the SHA-256 of the
//! chunk text, so chunking the same input twice yields identical chunks.
//!
//! # Example
//!
//! ```rust
//! use study_companion_core::chunk::{chunk_segments, ChunkParams};
//! use study_companion_core::models::{DocumentId, Locator, Segment};
//!
//! let segments = vec![Segment {
//!     text: "Hello world.".to_string(),
//!     locator: Locator::Offset { start: 0, end: 12 },
//! }];
//! let chunks = chunk_segments(DocumentId(1), &segments, &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "1-0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, DocumentId, Locator, Segment};

/// Default window length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;
/// Default share of a window repeated at the start of the next one.
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.15;

/// Chunking parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkParams {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks as a fraction of `chunk_size`.
    pub overlap_ratio: f64,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
        }
    }
}

impl ChunkParams {
    /// Overlap in characters, always strictly smaller than the window.
    pub fn overlap_chars(&self) -> usize {
        let size = self.chunk_size.max(1);
        let overlap = (size as f64 * self.overlap_ratio.clamp(0.0, 1.0)).round() as usize;
        overlap.min(size - 1)
    }
}

/// Split segments into chunks with contiguous indices starting at 0.
///
/// Whitespace-only segments produce no chunks; a document with no text at
/// all yields an empty vector.
pub fn chunk_segments(
    document_id: DocumentId,
    segments: &[Segment],
    params: &ChunkParams,
) -> Vec<Chunk> {
    let size = params.chunk_size.max(1);
    let overlap = params.overlap_chars();
    let mut chunks = Vec::new();

    for segment in segments {
        let chars: Vec<char> = segment.text.chars().collect();
        let n = chars.len();
        let mut start = skip_whitespace(&chars, 0);

        while start < n {
            let mut end = (start + size).min(n);
            if end < n && !chars[end].is_whitespace() && !chars[end - 1].is_whitespace() {
                end = snap_end_to_whitespace(&chars, start, end);
            }

            let (piece_start, piece_end) = trim_span(&chars, start, end);
            if piece_start < piece_end {
                let text: String = chars[piece_start..piece_end].iter().collect();
                let locator = match segment.locator {
                    Locator::Page { page } => Locator::Page { page },
                    Locator::Offset { start: base, .. } => Locator::Offset {
                        start: base + piece_start,
                        end: base + piece_end,
                    },
                };
                chunks.push(make_chunk(document_id, chunks.len(), text, locator));
            }

            if end >= n {
                break;
            }

            let mut next = end.saturating_sub(overlap).max(start + 1);
            while next < end && !chars[next - 1].is_whitespace() {
                next += 1;
            }
            start = skip_whitespace(&chars, next);
        }
    }

    chunks
}

/// Pull `end` back to just after the last whitespace in the second half of
/// the window, or leave it where it is when there is none.
fn snap_end_to_whitespace(chars: &[char], start: usize, end: usize) -> usize {
    let floor = start + (end - start) / 2;
    (floor..end)
        .rev()
        .find(|&i| chars[i].is_whitespace())
        .map(|i| i + 1)
        .filter(|&i| i > start)
        .unwrap_or(end)
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn trim_span(chars: &[char], mut start: usize, mut end: usize) -> (usize, usize) {
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    (start, end)
}

/// Create a single [`Chunk`] with a deterministic ID and SHA-256 content hash.
fn make_chunk(document_id: DocumentId, index: usize, text: String, locator: Locator) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}-{}", document_id, index),
        document_id,
        chunk_index: index,
        text,
        locator,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_segment(text: &str) -> Segment {
        Segment {
            text: text.to_string(),
            locator: Locator::Offset {
                start: 0,
                end: text.chars().count(),
            },
        }
    }

    fn params(chunk_size: usize, overlap_ratio: f64) -> ChunkParams {
        ChunkParams {
            chunk_size,
            overlap_ratio,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_segments(DocumentId(7), &[offset_segment("Hello, world!")], &params(800, 0.15));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].id, "7-0");
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].locator, Locator::Offset { start: 0, end: 13 });
    }

    #[test]
    fn test_empty_and_blank_segments_yield_nothing() {
        let chunks = chunk_segments(
            DocumentId(1),
            &[offset_segment(""), offset_segment("  \n\n  ")],
            &ChunkParams::default(),
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        let text = (0..60)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_segments(DocumentId(1), &[offset_segment(&text)], &params(100, 0.2));
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let first_word_of_b = b.text.split_whitespace().next().unwrap();
            assert!(
                a.text.split_whitespace().any(|w| w == first_word_of_b),
                "chunk {} should start inside the tail of chunk {}",
                b.chunk_index,
                a.chunk_index
            );
        }
    }

    #[test]
    fn test_chunks_respect_size_and_word_boundaries() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu ".repeat(20);
        let chunks = chunk_segments(DocumentId(1), &[offset_segment(&text)], &params(64, 0.1));
        for c in &chunks {
            assert!(c.text.chars().count() <= 64);
            assert!(!c.text.starts_with(' ') && !c.text.ends_with(' '));
            for word in c.text.split_whitespace() {
                assert!(text.contains(word));
            }
        }
    }

    #[test]
    fn test_offsets_point_into_source_text() {
        let text = "First sentence here. Second sentence follows. ".repeat(30);
        let chars: Vec<char> = text.chars().collect();
        let chunks = chunk_segments(DocumentId(3), &[offset_segment(&text)], &params(120, 0.15));
        for c in &chunks {
            match c.locator {
                Locator::Offset { start, end } => {
                    let span: String = chars[start..end].iter().collect();
                    assert_eq!(span, c.text);
                }
                other => panic!("unexpected locator {:?}", other),
            }
        }
    }

    #[test]
    fn test_offset_base_is_added() {
        let seg = Segment {
            text: "tail text".to_string(),
            locator: Locator::Offset { start: 100, end: 109 },
        };
        let chunks = chunk_segments(DocumentId(1), &[seg], &ChunkParams::default());
        assert_eq!(chunks[0].locator, Locator::Offset { start: 100, end: 109 });
    }

    #[test]
    fn test_pages_are_not_merged() {
        let segments = vec![
            Segment {
                text: "Page one text.".to_string(),
                locator: Locator::Page { page: 1 },
            },
            Segment {
                text: "Page two text.".to_string(),
                locator: Locator::Page { page: 2 },
            },
        ];
        let chunks = chunk_segments(DocumentId(1), &segments, &ChunkParams::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].locator, Locator::Page { page: 1 });
        assert_eq!(chunks[1].locator, Locator::Page { page: 2 });
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_unbroken_run_is_hard_split() {
        let text = "x".repeat(250);
        let chunks = chunk_segments(DocumentId(1), &[offset_segment(&text)], &params(100, 0.1));
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.text.len() <= 100));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_segments(DocumentId(1), &[offset_segment(text)], &params(8, 0.25));
        assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_zero_overlap_still_progresses() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunk_segments(DocumentId(1), &[offset_segment(text)], &params(10, 0.0));
        let rejoined = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma. ".repeat(100);
        let c1 = chunk_segments(DocumentId(9), &[offset_segment(&text)], &params(90, 0.2));
        let c2 = chunk_segments(DocumentId(9), &[offset_segment(&text)], &params(90, 0.2));
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_overlap_chars_bounded() {
        assert_eq!(params(100, 0.15).overlap_chars(), 15);
        assert_eq!(params(10, 1.0).overlap_chars(), 9);
        assert_eq!(params(10, -1.0).overlap_chars(), 0);
    }
}
