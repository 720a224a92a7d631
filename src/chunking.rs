//! Sentence-aware chunking of extracted document text.
//!
//! Text is segmented into sentences, and sentences are accumulated into
//! chunks of at most `chunk_size` characters. When a chunk is closed, the
//! next one is seeded with the trailing `overlap` characters of the closed
//! chunk so that context spanning a boundary is retrievable from both sides.
//!
//! All sizes and offsets are measured in characters, not bytes.

use serde::{Deserialize, Serialize};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Characters that end a sentence when followed by whitespace.
const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', ';'];

/// Chunk size and overlap, both in characters.
///
/// # Examples
///
/// ```
/// use docsift::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert_eq!(config.overlap, 50);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A chunk of text from a larger document.
///
/// `text` is exactly the characters `[char_start, char_end)` of the text
/// that was split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text content.
    pub text: String,
    /// Zero-based chunk index within the split text.
    pub index: usize,
    /// Character offset where this chunk starts.
    pub char_start: usize,
    /// Character offset one past the end of this chunk.
    pub char_end: usize,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Split text into sentence-aligned, overlapping chunks.
///
/// Empty or whitespace-only input produces no chunks. A single sentence
/// longer than `chunk_size` is emitted whole as its own chunk. The chunks
/// cover the whole input: the first starts at 0, the last ends at the
/// input's character length, and each chunk starts at or before the end of
/// the previous one.
///
/// # Examples
///
/// ```
/// use docsift::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 500, 50);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// assert!(chunk_text("   \n ", 500, 50).is_empty());
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();

    // Build a map of char index -> byte index for O(1) slicing
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut push = |start: usize, end: usize| {
        let index = chunks.len();
        chunks.push(Chunk {
            text: text[char_to_byte[start]..char_to_byte[end]].to_string(),
            index,
            char_start: start,
            char_end: end,
        });
    };

    let mut start = 0;
    let mut end = 0;
    for (_, sentence_end) in sentence_spans_of(&chars) {
        let sentence_len = sentence_end - end;
        if end > start && (end - start) + sentence_len > chunk_size {
            push(start, end);
            // The seed never pushes the next chunk past the size bound.
            let budget = overlap.min(chunk_size.saturating_sub(sentence_len));
            start = overlap_start(&chars, start, end, budget);
        }
        end = sentence_end;
    }
    if end > start {
        push(start, end);
    }

    chunks
}

/// Sentence spans `[start, end)` in characters.
///
/// Spans are contiguous and cover the whole text: each sentence owns the
/// whitespace that follows its terminator.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let chars: Vec<char> = text.chars().collect();
    sentence_spans_of(&chars)
}

fn sentence_spans_of(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let is_break = SENTENCE_TERMINATORS.contains(&chars[i])
            && chars.get(i + 1).is_some_and(|c| c.is_whitespace());
        if !is_break {
            i += 1;
            continue;
        }

        let mut next = i + 1;
        while next < chars.len() && chars[next].is_whitespace() {
            next += 1;
        }

        // "e.g. the" and friends: a lowercase continuation is not a new sentence
        if chars.get(next).is_some_and(|c| c.is_lowercase()) {
            i = next;
            continue;
        }

        spans.push((start, next));
        start = next;
        i = next;
    }

    if start < chars.len() {
        spans.push((start, chars.len()));
    }

    spans
}

/// Start of the overlap seeded from the closed chunk `[start, end)`.
///
/// Takes the trailing `budget` characters and snaps forward so the seed
/// begins at a word. Returns `end` when nothing is carried over.
fn overlap_start(chars: &[char], start: usize, end: usize, budget: usize) -> usize {
    if budget == 0 {
        return end;
    }

    let mut pos = end - budget.min(end - start);
    if pos > start && !chars[pos - 1].is_whitespace() {
        while pos < end && !chars[pos].is_whitespace() {
            pos += 1;
        }
    }
    while pos < end && chars[pos].is_whitespace() {
        pos += 1;
    }

    pos
}
