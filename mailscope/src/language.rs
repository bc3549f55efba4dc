//! Script-based language routing.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ko")]
    Korean,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Korean];

    pub fn as_tag(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Korean => "ko",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Korean => "Korean",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Error for request fields that only accept a fixed set of values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {field} '{value}', expected one of: {expected}")]
pub struct InvalidChoice {
    pub field: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl FromStr for Language {
    type Err = InvalidChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::English),
            "ko" => Ok(Language::Korean),
            other => Err(InvalidChoice {
                field: "language",
                value: other.to_string(),
                expected: "en, ko",
            }),
        }
    }
}

/// Caller-supplied language: either an explicit override or `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageTag {
    #[default]
    Auto,
    Explicit(Language),
}

impl LanguageTag {
    /// Explicit input always wins; `auto` runs the detector.
    pub fn resolve(self, text: &str) -> Language {
        match self {
            LanguageTag::Explicit(language) => language,
            LanguageTag::Auto => detect(text),
        }
    }
}

impl FromStr for LanguageTag {
    type Err = InvalidChoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.is_empty() || normalized == "auto" {
            return Ok(LanguageTag::Auto);
        }
        normalized
            .parse::<Language>()
            .map(LanguageTag::Explicit)
            .map_err(|_| InvalidChoice {
                field: "lang",
                value: s.to_string(),
                expected: "auto, en, ko",
            })
    }
}

/// Hangul syllables, Jamo and compatibility Jamo.
fn is_hangul(c: char) -> bool {
    matches!(c as u32,
        0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F | 0xA960..=0xA97F | 0xD7B0..=0xD7FF)
}

/// Any Hangul character routes the text to Korean; everything else is English.
pub fn detect(text: &str) -> Language {
    if text.chars().any(is_hangul) {
        Language::Korean
    } else {
        Language::English
    }
}
