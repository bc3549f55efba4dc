use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use crate::capability::{CapabilityError, CapabilityResult};

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 256,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> CapabilityResult<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let req_body = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
            max_tokens: Some(request.max_tokens.unwrap_or(self.default_max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.default_temperature)),
        };

        let exchange = async {
            let response = self
                .client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send()
                .await
                .map_err(|e| CapabilityError::Failed(format!("LLM HTTP request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CapabilityError::Failed(format!("LLM API error {}: {}", status, body)));
            }

            response
                .json::<OpenAiResponse>()
                .await
                .map_err(|e| CapabilityError::Malformed(format!("failed to parse LLM response: {}", e)))
        };

        let resp_body = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| CapabilityError::Timeout(timeout))??;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CapabilityError::Malformed("LLM response has no choices".to_string()))?;

        let usage = resp_body.usage.unwrap_or_default();
        let usage = UsageMetadata {
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
            total_tokens: usage.total_tokens.unwrap_or(0),
        };
        debug!(model = %self.model, total_tokens = usage.total_tokens, "LLM call complete");

        Ok(LlmResponse {
            content: choice.message.content,
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}
