//! Model-backed capabilities and their failure taxonomy.
//!
//! Every external model call returns a `CapabilityResult`; callers branch on the
//! error variant to pick a fallback instead of catching failures.

use std::sync::Arc;
use std::time::Duration;

use crate::language::Language;
use crate::summarizer::budget::LengthBudget;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("capability failed: {0}")]
    Failed(String),
    #[error("malformed output: {0}")]
    Malformed(String),
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// A capability slot resolved once at startup.
pub enum Capability<T: ?Sized> {
    Available(Arc<T>),
    Unavailable { reason: String },
}

impl<T: ?Sized> Capability<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Capability::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    /// Borrow the handle, or turn the slot into an `Unavailable` error.
    pub fn get(&self) -> CapabilityResult<&Arc<T>> {
        match self {
            Capability::Available(handle) => Ok(handle),
            Capability::Unavailable { reason } => Err(CapabilityError::Unavailable(reason.clone())),
        }
    }
}

impl<T: ?Sized> Clone for Capability<T> {
    fn clone(&self) -> Self {
        match self {
            Capability::Available(handle) => Capability::Available(Arc::clone(handle)),
            Capability::Unavailable { reason } => Capability::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Available(_) => f.write_str("Available"),
            Capability::Unavailable { reason } => write!(f, "Unavailable({})", reason),
        }
    }
}

/// `Summarize(text, constraints) -> text`
#[async_trait::async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, text: &str, budget: LengthBudget) -> CapabilityResult<String>;
}

/// Raw model output before it is mapped onto a sentiment category.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClassification {
    /// Star-like label, e.g. "4 stars"
    pub label: String,
    pub score: f64,
}

/// `Classify(text) -> label`
#[async_trait::async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, text: &str) -> CapabilityResult<RawClassification>;
}

/// `Translate(text, target) -> text`
#[async_trait::async_trait]
pub trait Translate: Send + Sync {
    async fn translate(&self, text: &str, target: Language) -> CapabilityResult<String>;
}
