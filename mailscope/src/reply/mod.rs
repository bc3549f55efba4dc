//! Reply drafting through an external generation process.

pub mod postprocess;
pub mod process;

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::capability::{Capability, CapabilityError, CapabilityResult};
use crate::language::Language;
use postprocess::{is_prompt_request, strip_control_sequences, strip_echoed_prompt, REPLY_MARKERS};

pub const TIMEOUT_WARNING: &str = "⚠️ Reply generation timed out. Please try again.";
pub const ERROR_WARNING: &str = "⚠️ Error generating reply. Please try again.";
pub const UNAVAILABLE_WARNING: &str = "⚠️ Reply generation is not configured on this server.";
pub const INVALID_WARNING: &str =
    "⚠️ The model did not return a valid reply. Try with a longer or clearer email.";
pub const EMPTY_WARNING: &str = "⚠️ The model returned an empty response.";

/// One frame of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// A non-empty output line with control sequences removed
    Chunk(String),
    /// No output for one heartbeat interval
    Keepalive,
    Done,
    Error(String),
}

/// An external text generator reached through a prompt-in, text-out protocol.
#[async_trait::async_trait]
pub trait ReplyWorker: Send + Sync {
    /// Run to completion and return the raw output.
    async fn invoke(&self, prompt: &str, timeout: Duration) -> CapabilityResult<String>;

    /// Stream output line by line. The stream always ends with `Done` or `Error`,
    /// except when the receiver is dropped, which terminates the process.
    fn stream(&self, prompt: String, timeout: Duration) -> mpsc::Receiver<ReplyEvent>;
}

pub fn build_reply_prompt(email: &str, language: Language) -> String {
    let instructions = match language {
        Language::English => {
            "You are an assistant that writes polite, professional email replies.\n\
             Based on the following email, please write a short and relevant reply."
        }
        Language::Korean => {
            "You are an assistant that writes polite, professional email replies.\n\
             Based on the following email, please write a short and relevant reply in Korean (한국어로 답장을 작성하세요)."
        }
    };
    format!(
        "{}\n\n--- EMAIL START ---\n{}\n--- EMAIL END ---\n\nReply:\n",
        instructions,
        email.trim()
    )
}

/// Turn raw process output into the text shown to the user.
pub fn finalize_reply(raw: &str) -> String {
    let cleaned = strip_control_sequences(raw);
    let cleaned = cleaned.trim();
    if is_prompt_request(cleaned) {
        return INVALID_WARNING.to_string();
    }
    let reply = strip_echoed_prompt(cleaned, REPLY_MARKERS).trim();
    if reply.is_empty() {
        EMPTY_WARNING.to_string()
    } else {
        reply.to_string()
    }
}

/// Reply drafting with user-visible warnings in place of errors.
pub struct ReplyService {
    worker: Capability<dyn ReplyWorker>,
    timeout: Duration,
}

impl ReplyService {
    pub fn new(worker: Capability<dyn ReplyWorker>, timeout: Duration) -> Self {
        Self { worker, timeout }
    }

    pub fn is_available(&self) -> bool {
        self.worker.is_available()
    }

    pub async fn draft(&self, email: &str, language: Language) -> String {
        let worker = match self.worker.get() {
            Ok(worker) => worker,
            Err(e) => {
                warn!(%e, "reply requested but no reply worker");
                return UNAVAILABLE_WARNING.to_string();
            }
        };

        match worker.invoke(&build_reply_prompt(email, language), self.timeout).await {
            Ok(raw) => finalize_reply(&raw),
            Err(CapabilityError::Timeout(after)) => {
                warn!(?after, "reply generation timed out");
                TIMEOUT_WARNING.to_string()
            }
            Err(e) => {
                warn!(%e, "reply generation failed");
                ERROR_WARNING.to_string()
            }
        }
    }

    pub fn stream(&self, email: &str, language: Language) -> mpsc::Receiver<ReplyEvent> {
        match self.worker.get() {
            Ok(worker) => worker.stream(build_reply_prompt(email, language), self.timeout),
            Err(e) => {
                warn!(%e, "reply stream requested but no reply worker");
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(ReplyEvent::Error(UNAVAILABLE_WARNING.to_string()));
                rx
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Scripted(CapabilityResult<String>);

    #[async_trait::async_trait]
    impl ReplyWorker for Scripted {
        async fn invoke(&self, _prompt: &str, _timeout: Duration) -> CapabilityResult<String> {
            self.0.clone()
        }

        fn stream(&self, _prompt: String, _timeout: Duration) -> mpsc::Receiver<ReplyEvent> {
            let (tx, rx) = mpsc::channel(4);
            let _ = tx.try_send(ReplyEvent::Chunk("Hello".to_string()));
            let _ = tx.try_send(ReplyEvent::Done);
            rx
        }
    }

    fn service(result: CapabilityResult<String>) -> ReplyService {
        ReplyService::new(Capability::Available(Arc::new(Scripted(result))), Duration::from_secs(5))
    }

    #[test]
    fn prompt_wraps_email_and_ends_with_marker() {
        let prompt = build_reply_prompt("  Can we meet Friday?  ", Language::English);
        assert!(prompt.starts_with("You are an assistant that writes polite, professional email replies."));
        assert!(prompt.contains("--- EMAIL START ---\nCan we meet Friday?\n--- EMAIL END ---"));
        assert!(prompt.ends_with("Reply:\n"));

        let ko = build_reply_prompt("금요일에 만날 수 있을까요?", Language::Korean);
        assert!(ko.contains("한국어로"));
    }

    #[test]
    fn finalize_cleans_and_validates() {
        assert_eq!(finalize_reply("\u{1b}[1GReply: Sure, Friday works.\n"), "Sure, Friday works.");
        assert_eq!(finalize_reply("Please provide the email."), INVALID_WARNING);
        assert_eq!(finalize_reply("  \u{2819}  "), EMPTY_WARNING);
        assert_eq!(finalize_reply("Reply:"), EMPTY_WARNING);
    }

    #[tokio::test]
    async fn draft_maps_failures_to_warnings() {
        assert_eq!(
            service(Err(CapabilityError::Timeout(Duration::from_secs(60))))
                .draft("hi", Language::English)
                .await,
            TIMEOUT_WARNING
        );
        assert_eq!(
            service(Err(CapabilityError::Failed("exit status 1".to_string())))
                .draft("hi", Language::English)
                .await,
            ERROR_WARNING
        );
        assert_eq!(
            service(Ok("Thanks, will do.".to_string())).draft("hi", Language::English).await,
            "Thanks, will do."
        );
    }

    #[tokio::test]
    async fn unavailable_worker_yields_warning_and_error_event() {
        let service = ReplyService::new(Capability::unavailable("ollama not installed"), Duration::from_secs(1));
        assert!(!service.is_available());
        assert_eq!(service.draft("hi", Language::English).await, UNAVAILABLE_WARNING);

        let mut rx = service.stream("hi", Language::English);
        assert_eq!(rx.recv().await, Some(ReplyEvent::Error(UNAVAILABLE_WARNING.to_string())));
        assert_eq!(rx.recv().await, None);
    }
}
