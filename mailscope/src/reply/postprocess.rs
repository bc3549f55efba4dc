//! Text clean-up applied to external model output before it reaches a caller.

use once_cell::sync::Lazy;
use regex::Regex;

pub const REPLY_MARKERS: &[&str] = &["Reply:", "답장:"];
pub const SUMMARY_MARKERS: &[&str] = &["Summary:", "요약:"];

/// CSI and OSC escapes, lone escapes, C0 controls other than tab and newline, and
/// the braille block terminal spinners draw with.
static CONTROL_SEQUENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\\]^_]|[\x00-\x08\x0b-\x1f\x7f]|[\x{2800}-\x{28FF}]",
    )
    .unwrap()
});

pub fn strip_control_sequences(text: &str) -> String {
    CONTROL_SEQUENCES.replace_all(text, "").into_owned()
}

/// Keep only what follows the earliest marker; the text is returned whole when no
/// marker occurs.
pub fn strip_echoed_prompt<'a>(text: &'a str, markers: &[&str]) -> &'a str {
    markers
        .iter()
        .filter_map(|marker| text.find(marker).map(|pos| pos + marker.len()))
        .min()
        .map(|end| &text[end..])
        .unwrap_or(text)
}

/// The model asked for input instead of answering.
pub fn is_prompt_request(text: &str) -> bool {
    text.contains("Please provide me") || text.trim_start().to_lowercase().starts_with("please provide")
}
