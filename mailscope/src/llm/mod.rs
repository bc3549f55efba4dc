use std::sync::Arc;

use anyhow::Context;
use common::{LlmConfig, RemoteLlmConfig};

use crate::capability::CapabilityResult;

pub mod capabilities;
pub mod remote;

/// Core trait for chat-completion backends
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> CapabilityResult<LlmResponse>;

    /// Configured model name, for logging
    fn model(&self) -> &str;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            timeout_seconds: None,
        }
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Build a remote provider for one task endpoint.
///
/// Fails when the adapter is disabled or the endpoint lacks a URL or API key; the caller
/// turns the error into an unavailable capability.
pub fn create_llm_provider(
    llm_config: &LlmConfig,
    endpoint: Option<&RemoteLlmConfig>,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("none");
    match adapter {
        "remote" => {
            let remote_config = endpoint.context("remote adapter selected but no endpoint configured")?;

            let api_url = remote_config
                .api_url
                .clone()
                .context("missing api_url in remote config")?;
            let api_key_env = remote_config
                .api_key_env
                .as_deref()
                .context("missing api_key_env in remote config")?;
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let model = remote_config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let timeout_secs = remote_config.timeout_seconds.unwrap_or(30);
            let max_tokens = remote_config.max_tokens.unwrap_or(256);

            let provider = remote::RemoteLlmProvider::new(api_url, api_key, model)
                .with_defaults(timeout_secs, max_tokens, 0.3);
            Ok(Arc::new(provider))
        }
        "none" => anyhow::bail!("LLM adapter disabled"),
        _ => anyhow::bail!("unknown LLM adapter type: {}", adapter),
    }
}

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(text[start..=end].to_string()),
        _ => None,
    }
}
