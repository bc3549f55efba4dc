//! Rule-first, model-assisted sentiment classification.
//!
//! Precedence: negative-pattern override, then model output with keyword corrections,
//! then pure rules. Every path yields a verdict.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::{Capability, CapabilityError, CapabilityResult, Classify, RawClassification};

pub const OVERRIDE_SCORE: f64 = 0.95;
pub const NEGATIVE_CORRECTION_FLOOR: f64 = 0.85;
pub const POSITIVE_CORRECTION_FLOOR: f64 = 0.80;
pub const RULE_NEGATIVE_SCORE: f64 = 0.85;
pub const RULE_POSITIVE_SCORE: f64 = 0.90;
pub const RULE_NEUTRAL_SCORE: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentCategory {
    Negative,
    Neutral,
    Positive,
}

impl fmt::Display for SentimentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SentimentCategory::Negative => "negative",
            SentimentCategory::Neutral => "neutral",
            SentimentCategory::Positive => "positive",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentVerdict {
    /// Star band, e.g. "1 star" or "4 stars"
    pub label: String,
    pub score: f64,
    pub mapped_category: SentimentCategory,
}

impl SentimentVerdict {
    fn new(stars: u8, score: f64, mapped_category: SentimentCategory) -> Self {
        Self {
            label: star_label(stars),
            score,
            mapped_category,
        }
    }
}

fn star_label(stars: u8) -> String {
    if stars == 1 {
        "1 star".to_string()
    } else {
        format!("{} stars", stars)
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
}

/// One entry per negative signal; a text scores one hit per distinct entry matched.
static NEGATIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(can['’]t|cannot|can not|couldn['’]t|unable to|not able to|not working|doesn['’]t work|does not work|won['’]t work)",
        r"(?i)\bfail(s|ed|ing|ure|ures)?\b|실패",
        r"(?i)\berrors?\b|오류|에러",
        r"(?i)\bcrash(es|ed|ing)?\b|장애",
        r"(?i)\b(delay(s|ed)?|late|overdue)\b|지연",
        r"(?i)\burgent(ly)?\b|긴급",
        r"(?i)\bissues?\b",
        r"(?i)\bproblems?\b|문제",
        r"(?i)\bblock(ed|ing|er|ers)?\b",
        r"(?i)\b(disappointed|disappointing|frustrated|frustrating|unacceptable)\b|실망",
    ])
});

static URGENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\burgent(ly)?\b|긴급").unwrap());
static HELP_OR_ASAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(help|asap)\b|a\.s\.a\.p|도와|급히").unwrap());

static POSITIVE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(thanks|thank you|thankful|great|excellent|congratulations|congrats|appreciate|appreciated|awesome|glad|happy|thrilled|well done|good job|pleased|wonderful)\b|감사|축하",
    )
    .unwrap()
});

static STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([1-5])\s*stars?\b").unwrap());

/// Keyword evidence gathered once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub negative_hits: usize,
    pub urgent_call_for_help: bool,
    pub positive: bool,
}

impl Signals {
    pub fn scan(text: &str) -> Self {
        Self {
            negative_hits: NEGATIVE_PATTERNS.iter().filter(|re| re.is_match(text)).count(),
            urgent_call_for_help: URGENT.is_match(text) && HELP_OR_ASAP.is_match(text),
            positive: POSITIVE_KEYWORDS.is_match(text),
        }
    }
}

/// Hard negative rules that bypass the model.
fn rule_override(signals: &Signals) -> Option<SentimentVerdict> {
    if signals.negative_hits >= 2 || signals.urgent_call_for_help {
        Some(SentimentVerdict::new(1, OVERRIDE_SCORE, SentimentCategory::Negative))
    } else {
        None
    }
}

/// Verdict from keywords alone.
pub fn rule_verdict(signals: &Signals) -> SentimentVerdict {
    if signals.negative_hits > 0 {
        SentimentVerdict::new(1, RULE_NEGATIVE_SCORE, SentimentCategory::Negative)
    } else if signals.positive {
        SentimentVerdict::new(5, RULE_POSITIVE_SCORE, SentimentCategory::Positive)
    } else {
        SentimentVerdict::new(3, RULE_NEUTRAL_SCORE, SentimentCategory::Neutral)
    }
}

/// Map an "N stars" label: 1-2 negative, 3 neutral, 4-5 positive.
fn map_model_output(raw: RawClassification) -> CapabilityResult<SentimentVerdict> {
    let stars: u8 = STARS
        .captures(&raw.label)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| CapabilityError::Malformed(format!("unexpected sentiment label '{}'", raw.label)))?;
    if !raw.score.is_finite() {
        return Err(CapabilityError::Malformed(format!("non-finite score {}", raw.score)));
    }
    let category = match stars {
        1 | 2 => SentimentCategory::Negative,
        3 => SentimentCategory::Neutral,
        _ => SentimentCategory::Positive,
    };
    Ok(SentimentVerdict::new(stars, raw.score.clamp(0.0, 1.0), category))
}

/// Keyword corrections over a model verdict. The negative correction wins when both apply.
fn correct(verdict: SentimentVerdict, signals: &Signals) -> SentimentVerdict {
    if verdict.mapped_category != SentimentCategory::Negative && signals.negative_hits > 0 {
        debug!(model = %verdict.mapped_category, "negative keyword overrides model verdict");
        return SentimentVerdict::new(
            1,
            verdict.score.max(NEGATIVE_CORRECTION_FLOOR),
            SentimentCategory::Negative,
        );
    }
    if verdict.mapped_category == SentimentCategory::Neutral && signals.positive {
        debug!("positive keyword upgrades neutral model verdict");
        return SentimentVerdict::new(
            4,
            verdict.score.max(POSITIVE_CORRECTION_FLOOR),
            SentimentCategory::Positive,
        );
    }
    verdict
}

pub struct SentimentClassifier {
    model: Capability<dyn Classify>,
    prefix_chars: usize,
}

impl SentimentClassifier {
    pub fn new(model: Capability<dyn Classify>, prefix_chars: usize) -> Self {
        Self {
            model,
            prefix_chars: prefix_chars.max(1),
        }
    }

    pub async fn classify(&self, text: &str) -> SentimentVerdict {
        let signals = Signals::scan(text);
        if let Some(verdict) = rule_override(&signals) {
            debug!(hits = signals.negative_hits, "negative rule override");
            return verdict;
        }

        let model = match self.model.get() {
            Ok(model) => model,
            Err(e) => {
                warn!(%e, "sentiment model unavailable, using rules");
                return rule_verdict(&signals);
            }
        };

        let prefix: String = text.chars().take(self.prefix_chars).collect();
        match model.classify(&prefix).await.and_then(map_model_output) {
            Ok(verdict) => correct(verdict, &signals),
            Err(e) => {
                warn!(%e, "sentiment model failed, using rules");
                rule_verdict(&signals)
            }
        }
    }
}
