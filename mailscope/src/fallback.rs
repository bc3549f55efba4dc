//! Rule-based extractive fallback: the first N sentences of a text.
//!
//! Pure and offline; used whenever a model-backed step is unavailable or fails.

use once_cell::sync::Lazy;
use regex::Regex;

/// Sentence-terminal punctuation (ASCII and full-width) followed by whitespace.
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?。！？]\s+").unwrap());

/// Split `text` into trimmed, non-empty sentences. Terminal punctuation stays attached.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END.find_iter(text) {
        let punct_len = m.as_str().chars().next().map(char::len_utf8).unwrap_or(0);
        out.push(&text[last..m.start() + punct_len]);
        last = m.end();
    }
    out.push(&text[last..]);

    out.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Join the first `max_sentences` sentences with a single space.
///
/// Returns the trimmed input when no sentence is found; never fails.
pub fn extract(text: &str, max_sentences: usize) -> String {
    let found = sentences(text);
    if found.is_empty() {
        return text.trim().to_string();
    }
    found
        .into_iter()
        .take(max_sentences.max(1))
        .collect::<Vec<_>>()
        .join(" ")
}
