//! Tokenizer adapter used for length measurement and chunk slicing.
//!
//! A `TokenSequence` remembers which tokenizer produced it. Decoding it with any other
//! tokenizer is rejected, because token ids from one vocabulary mean nothing to another.

use std::ops::Range;
use std::sync::Arc;

use crate::capability::{CapabilityError, CapabilityResult};

/// Reported limits at or above this are treated as "unknown".
pub const IMPLAUSIBLE_MAX_LENGTH: usize = 100_000;

/// Ordered token ids plus the byte span each token covers in the source text.
#[derive(Debug, Clone)]
pub struct TokenSequence {
    tokenizer: String,
    ids: Vec<u32>,
    offsets: Vec<(usize, usize)>,
    source: Arc<str>,
}

impl TokenSequence {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn tokenizer(&self) -> &str {
        &self.tokenizer
    }

    /// Byte range of the source covered by tokens `range`.
    fn byte_span(&self, range: &Range<usize>) -> Option<Range<usize>> {
        if range.start >= range.end || range.end > self.offsets.len() {
            return None;
        }
        Some(self.offsets[range.start].0..self.offsets[range.end - 1].1)
    }
}

pub trait Tokenizer: Send + Sync {
    /// Stable identifier of the vocabulary.
    fn id(&self) -> &str;

    fn encode(&self, text: &str) -> CapabilityResult<TokenSequence>;

    fn decode(&self, tokens: &TokenSequence, range: Range<usize>) -> CapabilityResult<String>;

    /// Maximum input length as the tokenizer reports it; may be absent or bogus.
    fn reported_max_length(&self) -> Option<usize>;
}

/// Wraps a tokenizer with the per-language default limit.
#[derive(Clone)]
pub struct TokenizerAdapter {
    inner: Arc<dyn Tokenizer>,
    default_max_length: usize,
}

impl TokenizerAdapter {
    pub fn new(inner: Arc<dyn Tokenizer>, default_max_length: usize) -> Self {
        Self {
            inner,
            default_max_length,
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn encode(&self, text: &str) -> CapabilityResult<TokenSequence> {
        self.inner.encode(text)
    }

    pub fn decode(&self, tokens: &TokenSequence, range: Range<usize>) -> CapabilityResult<String> {
        if tokens.tokenizer != self.inner.id() {
            return Err(CapabilityError::Malformed(format!(
                "token sequence from '{}' cannot be decoded by '{}'",
                tokens.tokenizer,
                self.inner.id()
            )));
        }
        self.inner.decode(tokens, range)
    }

    /// Reported limit, unless it is missing, zero or implausibly large.
    pub fn max_input_length(&self) -> usize {
        match self.inner.reported_max_length() {
            Some(n) if n > 0 && n < IMPLAUSIBLE_MAX_LENGTH => n,
            _ => self.default_max_length,
        }
    }
}

/// Dependency-free tokenizer approximating a subword vocabulary.
///
/// Alphanumeric runs are cut into pieces of at most `PIECE_CHARS` characters, Hangul
/// runs into pairs of syllables, and every other visible character is its own token.
/// Ids are a stable FNV-1a hash of the piece folded into a 32k vocabulary.
pub struct HeuristicTokenizer {
    id: String,
}

const PIECE_CHARS: usize = 8;
const HANGUL_PIECE_CHARS: usize = 2;
const VOCAB_SIZE: u32 = 32_000;

#[derive(Clone, Copy, PartialEq)]
enum CharClass {
    Space,
    Word,
    Hangul,
    Symbol,
}

fn classify(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Space
    } else if matches!(c as u32, 0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F) {
        CharClass::Hangul
    } else if c.is_alphanumeric() {
        CharClass::Word
    } else {
        CharClass::Symbol
    }
}

fn piece_id(piece: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in piece.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % VOCAB_SIZE
}

impl HeuristicTokenizer {
    pub fn new() -> Self {
        Self {
            id: "heuristic-v1".to_string(),
        }
    }
}

impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn encode(&self, text: &str) -> CapabilityResult<TokenSequence> {
        let mut ids = Vec::new();
        let mut offsets = Vec::new();

        let mut current: Option<(CharClass, usize, usize)> = None; // class, start, chars
        let mut flush = |span: (usize, usize)| {
            ids.push(piece_id(&text[span.0..span.1]));
            offsets.push(span);
        };

        for (idx, c) in text.char_indices() {
            let class = classify(c);
            if let Some((open_class, start, count)) = current {
                let limit = match open_class {
                    CharClass::Hangul => HANGUL_PIECE_CHARS,
                    _ => PIECE_CHARS,
                };
                if open_class == class && class != CharClass::Symbol && count < limit {
                    current = Some((open_class, start, count + 1));
                    continue;
                }
                flush((start, idx));
                current = None;
            }
            if class != CharClass::Space {
                current = Some((class, idx, 1));
            }
        }
        if let Some((_, start, _)) = current {
            flush((start, text.len()));
        }

        Ok(TokenSequence {
            tokenizer: self.id.clone(),
            ids,
            offsets,
            source: Arc::from(text),
        })
    }

    fn decode(&self, tokens: &TokenSequence, range: Range<usize>) -> CapabilityResult<String> {
        let span = tokens.byte_span(&range).ok_or_else(|| {
            CapabilityError::Malformed(format!(
                "token range {:?} outside sequence of {}",
                range,
                tokens.len()
            ))
        })?;
        Ok(tokens.source[span].to_string())
    }

    fn reported_max_length(&self) -> Option<usize> {
        None
    }
}

/// HuggingFace `tokenizer.json` files.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    id: String,
    inner: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer {}: {}", path, e))?;
        Ok(Self {
            id: format!("hf:{}", path),
            inner,
        })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl Tokenizer for HfTokenizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn encode(&self, text: &str) -> CapabilityResult<TokenSequence> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| CapabilityError::Failed(format!("tokenizer encode failed: {}", e)))?;
        Ok(TokenSequence {
            tokenizer: self.id.clone(),
            ids: encoding.get_ids().to_vec(),
            offsets: encoding.get_offsets().to_vec(),
            source: Arc::from(text),
        })
    }

    fn decode(&self, tokens: &TokenSequence, range: Range<usize>) -> CapabilityResult<String> {
        let ids = tokens.ids.get(range.clone()).ok_or_else(|| {
            CapabilityError::Malformed(format!("token range {:?} outside sequence", range))
        })?;
        self.inner
            .decode(ids, true)
            .map_err(|e| CapabilityError::Failed(format!("tokenizer decode failed: {}", e)))
    }

    fn reported_max_length(&self) -> Option<usize> {
        self.inner.get_truncation().map(|t| t.max_length)
    }
}
