//! Sliding-window text chunker.
//!
//! Splits a message's composed text into overlapping [`Chunk`]s sized for
//! an embedding model. Sizes are configured in approximate tokens and
//! converted to a character budget at 4 characters per token.
//!
//! # Algorithm
//!
//! 1. Trim the text. Empty text produces no chunks.
//! 2. If the trimmed text fits within `chunk_tokens × 4` characters, it is
//!    the only chunk.
//! 3. Otherwise slide a window of that many characters across the text,
//!    advancing by `(chunk_tokens − overlap_tokens) × 4` characters.
//! 4. Each window is trimmed and dropped if nothing is left. The walk stops
//!    at the first window that reaches the end of the text.
//!
//! Windows are counted in Unicode scalar values, so a multi-byte character
//! is never split.
//!
//! # Example
//!
//! ```rust
//! use mailrag_core::chunk::{chunk_text, ChunkerConfig};
//!
//! let chunks = chunk_text("msg-1", "Hello world.", &ChunkerConfig::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].position, 0);
//! ```

use thiserror::Error;

use crate::models::Chunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_CHUNK_TOKENS: usize = 500;
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkConfigError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk overlap ({overlap_tokens}) must be smaller than chunk size ({chunk_tokens})")]
    OverlapTooLarge {
        chunk_tokens: usize,
        overlap_tokens: usize,
    },
}

/// Chunk size and overlap, both in approximate tokens.
///
/// Construction validates that the window always advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    chunk_tokens: usize,
    overlap_tokens: usize,
}

impl ChunkerConfig {
    pub fn new(chunk_tokens: usize, overlap_tokens: usize) -> Result<Self, ChunkConfigError> {
        if chunk_tokens == 0 {
            return Err(ChunkConfigError::ZeroChunkSize);
        }
        if overlap_tokens >= chunk_tokens {
            return Err(ChunkConfigError::OverlapTooLarge {
                chunk_tokens,
                overlap_tokens,
            });
        }
        Ok(Self {
            chunk_tokens,
            overlap_tokens,
        })
    }

    pub fn chunk_tokens(&self) -> usize {
        self.chunk_tokens
    }

    pub fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    /// Window size in characters.
    pub fn char_budget(&self) -> usize {
        self.chunk_tokens * CHARS_PER_TOKEN
    }

    /// Characters shared by consecutive windows.
    pub fn overlap_budget(&self) -> usize {
        self.overlap_tokens * CHARS_PER_TOKEN
    }

    /// Distance between window starts. Always at least 1.
    pub fn step(&self) -> usize {
        self.char_budget() - self.overlap_budget()
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: DEFAULT_CHUNK_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

/// Split `text` into overlapping windows.
///
/// Positions are contiguous from 0 in emission order. The output is a pure
/// function of `text` and `config`.
pub fn chunk_text(parent_id: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let budget = config.char_budget();

    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = bounds.len();
    bounds.push(text.len());

    if char_count <= budget {
        return vec![make_chunk(parent_id, 0, text)];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + budget).min(char_count);
        let window = text[bounds[start]..bounds[end]].trim();
        if !window.is_empty() {
            chunks.push(make_chunk(parent_id, chunks.len(), window));
        }
        if end == char_count {
            break;
        }
        start += config.step();
    }

    chunks
}

fn make_chunk(parent_id: &str, position: usize, text: &str) -> Chunk {
    Chunk {
        parent_id: parent_id.to_string(),
        position,
        text: text.to_string(),
    }
}
