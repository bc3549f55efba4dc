//! Startup-time resolution of every model-backed capability.
//!
//! Each slot is decided once from configuration and never changes afterwards; request
//! handlers only read it.

use std::collections::HashMap;
use std::sync::Arc;

use common::{Config, LlmConfig, RemoteLlmConfig};
use serde::Serialize;
use tracing::{info, warn};

use crate::capability::{Capability, Classify, Summarize, Translate};
use crate::language::Language;
use crate::llm::capabilities::{LlmClassifier, LlmSummarizer, LlmTranslator};
use crate::llm::{create_llm_provider, LlmProvider};
use crate::mailbox::{GmailMailbox, Mailbox, SampleMailbox};
use crate::reply::process::ProcessReplyWorker;
use crate::reply::ReplyWorker;
use crate::summarizer::SummarizerProfile;
use crate::tokenizer::{HeuristicTokenizer, Tokenizer};

pub struct CapabilityRegistry {
    summarizers: HashMap<Language, Capability<SummarizerProfile>>,
    classifier: Capability<dyn Classify>,
    translator: Capability<dyn Translate>,
    replier: Capability<dyn ReplyWorker>,
    mailbox: Capability<dyn Mailbox>,
}

/// One row of `/api/v1/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Summarization(Language),
    Classification,
    Translation,
}

fn endpoint_for(llm: &LlmConfig, task: Task) -> Option<&RemoteLlmConfig> {
    match task {
        Task::Summarization(language) => llm.summarization_endpoint(language.as_tag()),
        Task::Classification => llm.endpoint(llm.classification.as_ref()),
        Task::Translation => llm.endpoint(llm.translation.as_ref()),
    }
}

fn provider_for(config: &Config, task: Task) -> Result<Arc<dyn LlmProvider>, String> {
    let llm = config.llm.as_ref().ok_or_else(|| "no [llm] section configured".to_string())?;
    create_llm_provider(llm, endpoint_for(llm, task)).map_err(|e| format!("{:#}", e))
}

fn tokenizer_for(path: Option<&str>, language: Language) -> Arc<dyn Tokenizer> {
    match path {
        #[cfg(feature = "hf-tokenizer")]
        Some(path) => match crate::tokenizer::HfTokenizer::from_file(path) {
            Ok(tokenizer) => Arc::new(tokenizer),
            Err(e) => {
                warn!(%language, %e, "failed to load tokenizer file, using built-in tokenizer");
                Arc::new(HeuristicTokenizer::new())
            }
        },
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(path) => {
            warn!(%language, path, "built without the hf-tokenizer feature, ignoring tokenizer file");
            Arc::new(HeuristicTokenizer::new())
        }
        None => Arc::new(HeuristicTokenizer::new()),
    }
}

fn summarizer_from_config(config: &Config, language: Language) -> Capability<SummarizerProfile> {
    let cfg = &config.summarizer;
    let (cap, tokenizer_path) = match language {
        Language::English => (cfg.default_cap_en, cfg.tokenizer_path_en.as_deref()),
        Language::Korean => (cfg.default_cap_ko, cfg.tokenizer_path_ko.as_deref()),
    };
    match provider_for(config, Task::Summarization(language)) {
        Ok(provider) => {
            let model: Arc<dyn Summarize> = Arc::new(LlmSummarizer::new(provider, language));
            Capability::Available(Arc::new(SummarizerProfile::new(
                language,
                model,
                tokenizer_for(tokenizer_path, language),
                cap,
            )))
        }
        Err(reason) => Capability::unavailable(reason),
    }
}

fn replier_from_config(config: &Config) -> Capability<dyn ReplyWorker> {
    let cfg = &config.reply;
    if !cfg.enabled {
        return Capability::unavailable("reply generation disabled");
    }
    match which::which(&cfg.command) {
        Ok(path) => {
            info!(command = %path.display(), "reply command found");
            Capability::Available(Arc::new(ProcessReplyWorker::from_config(cfg)))
        }
        Err(_) => Capability::unavailable(format!("'{}' not found on PATH", cfg.command)),
    }
}

fn mailbox_from_config(config: &Config) -> Capability<dyn Mailbox> {
    let cfg = &config.mailbox;
    match cfg.provider.as_str() {
        "gmail" => match GmailMailbox::from_config(cfg) {
            Ok(mailbox) => Capability::Available(Arc::new(mailbox)),
            Err(e) => Capability::unavailable(format!("{:#}", e)),
        },
        "sample" => Capability::Available(Arc::new(SampleMailbox)),
        "none" => Capability::unavailable("mailbox disabled"),
        other => Capability::unavailable(format!("unknown mailbox provider '{}'", other)),
    }
}

impl CapabilityRegistry {
    /// Every slot unavailable.
    pub fn empty() -> Self {
        Self {
            summarizers: HashMap::new(),
            classifier: Capability::unavailable("not configured"),
            translator: Capability::unavailable("not configured"),
            replier: Capability::unavailable("not configured"),
            mailbox: Capability::unavailable("not configured"),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::empty();
        for language in Language::ALL {
            registry
                .summarizers
                .insert(language, summarizer_from_config(config, language));
        }
        registry.classifier = match provider_for(config, Task::Classification) {
            Ok(provider) => Capability::Available(Arc::new(LlmClassifier::new(provider))),
            Err(reason) => Capability::unavailable(reason),
        };
        registry.translator = match provider_for(config, Task::Translation) {
            Ok(provider) => Capability::Available(Arc::new(LlmTranslator::new(provider))),
            Err(reason) => Capability::unavailable(reason),
        };
        registry.replier = replier_from_config(config);
        registry.mailbox = mailbox_from_config(config);

        registry.log_availability();
        registry
    }

    pub fn with_summarizer(mut self, profile: SummarizerProfile) -> Self {
        self.summarizers
            .insert(profile.language, Capability::Available(Arc::new(profile)));
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classify>) -> Self {
        self.classifier = Capability::Available(classifier);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translate>) -> Self {
        self.translator = Capability::Available(translator);
        self
    }

    pub fn with_replier(mut self, replier: Arc<dyn ReplyWorker>) -> Self {
        self.replier = Capability::Available(replier);
        self
    }

    pub fn with_mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = Capability::Available(mailbox);
        self
    }

    pub fn summarizer(&self, language: Language) -> Capability<SummarizerProfile> {
        self.summarizers
            .get(&language)
            .cloned()
            .unwrap_or_else(|| Capability::unavailable(format!("no summarizer for {}", language)))
    }

    pub fn classifier(&self) -> Capability<dyn Classify> {
        self.classifier.clone()
    }

    pub fn translator(&self) -> Capability<dyn Translate> {
        self.translator.clone()
    }

    pub fn replier(&self) -> Capability<dyn ReplyWorker> {
        self.replier.clone()
    }

    pub fn mailbox(&self) -> Capability<dyn Mailbox> {
        self.mailbox.clone()
    }

    pub fn availability(&self) -> Vec<CapabilityStatus> {
        let mut out: Vec<CapabilityStatus> = Language::ALL
            .iter()
            .map(|language| status(format!("summarize.{}", language.as_tag()), &self.summarizer(*language)))
            .collect();
        out.push(status("classify".to_string(), &self.classifier));
        out.push(status("translate".to_string(), &self.translator));
        out.push(status("reply".to_string(), &self.replier));
        out.push(status("mailbox".to_string(), &self.mailbox));
        out
    }

    fn log_availability(&self) {
        for entry in self.availability() {
            match entry.reason {
                None => info!(capability = %entry.name, "capability available"),
                Some(reason) => warn!(capability = %entry.name, %reason, "capability unavailable, rules and fallbacks will be used"),
            }
        }
    }
}

fn status<T: ?Sized>(name: String, slot: &Capability<T>) -> CapabilityStatus {
    let reason = match slot {
        Capability::Available(_) => None,
        Capability::Unavailable { reason } => Some(reason.clone()),
    };
    CapabilityStatus {
        name,
        available: reason.is_none(),
        reason,
    }
}
