//! Per-message analysis shared by `/process` and the `process_emails` binary:
//! signature stripping, summary, sentiment and an optional reply draft.

use tracing::debug;

use crate::cleaner::strip_signature;
use crate::language::LanguageTag;
use crate::reply::ReplyService;
use crate::sentiment::{SentimentClassifier, SentimentVerdict};
use crate::storage::EmailAnalysis;
use crate::summarizer::budget::Mode;
use crate::summarizer::SummarizationController;

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub cleaned: String,
    pub summary: String,
    pub sentiment: SentimentVerdict,
    pub reply: Option<String>,
}

/// Where an analysed message came from, for persistence.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub email_id: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

impl Analysis {
    pub fn into_record(self, original: &str, provenance: Provenance) -> EmailAnalysis {
        EmailAnalysis {
            email_id: provenance.email_id,
            sender: provenance.sender,
            subject: provenance.subject,
            original_body: original.to_string(),
            cleaned_body: self.cleaned,
            summary: self.summary,
            sentiment_label: self.sentiment.label,
            sentiment_score: self.sentiment.score,
            reply: self.reply,
        }
    }
}

/// Analyse one message. A reply is drafted only when `replies` is given; drafting
/// never fails, so a missing or broken generator yields its warning text.
pub async fn analyze(
    controller: &SummarizationController,
    classifier: &SentimentClassifier,
    replies: Option<&ReplyService>,
    text: &str,
    lang: LanguageTag,
    mode: Mode,
) -> Analysis {
    let cleaned = strip_signature(text);
    let summary = controller.summarize(&cleaned, lang, mode).await;
    let sentiment = classifier.classify(&cleaned).await;

    let reply = match replies {
        Some(service) => {
            let language = lang.resolve(&cleaned);
            debug!(%language, "drafting reply");
            Some(service.draft(&cleaned, language).await)
        }
        None => None,
    };

    Analysis {
        cleaned,
        summary,
        sentiment,
        reply,
    }
}
