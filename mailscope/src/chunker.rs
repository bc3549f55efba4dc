//! Sliding-window chunking over token sequences.
//!
//! Windows of `window` tokens advance by `window - overlap` (at least 1). The last
//! window stops at the end of the sequence and may be shorter; nothing is padded.

use crate::capability::CapabilityResult;
use crate::tokenizer::{TokenSequence, TokenizerAdapter};

/// A decoded window of a token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Index of the first token of this window
    pub offset: usize,
    /// Window length in tokens
    pub len: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Split `tokens` into overlapping windows, dropping windows that decode to whitespace.
pub fn split(
    tokenizer: &TokenizerAdapter,
    tokens: &TokenSequence,
    window: usize,
    overlap: usize,
) -> CapabilityResult<Vec<Chunk>> {
    let total = tokens.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let window = window.max(1);
    let stride = window.saturating_sub(overlap).max(1);

    let mut chunks = Vec::with_capacity(total / stride + 1);
    let mut start = 0usize;
    loop {
        let end = (start + window).min(total);
        let text = tokenizer.decode(tokens, start..end)?;
        if !text.trim().is_empty() {
            chunks.push(Chunk {
                text,
                offset: start,
                len: end - start,
            });
        }
        if end == total {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}
