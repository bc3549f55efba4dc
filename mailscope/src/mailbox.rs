//! Mailbox collaborators: where `/api/emails` gets its messages.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use common::MailboxConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

pub const NO_BODY: &str = "(No readable body found)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub snippet: String,
    pub text: String,
}

#[async_trait::async_trait]
pub trait Mailbox: Send + Sync {
    /// Most recent inbox messages, newest first.
    async fn recent(&self, max: usize) -> Result<Vec<EmailMessage>>;
}

/// Fixed demo message for offline use.
pub struct SampleMailbox;

pub const SAMPLE_EMAIL: &str = "Hello Team,\n\n\
The project deadline is next Friday at 5 PM. \
Please send your draft by Tuesday at noon. Additionally, \
we had a delay due to server issues. Let me know if you have any questions.\n\n\
Thanks,\nProject Manager";

#[async_trait::async_trait]
impl Mailbox for SampleMailbox {
    async fn recent(&self, max: usize) -> Result<Vec<EmailMessage>> {
        let message = EmailMessage {
            id: "sample-1".to_string(),
            subject: "Project deadline".to_string(),
            snippet: SAMPLE_EMAIL.chars().take(100).collect(),
            text: SAMPLE_EMAIL.to_string(),
        };
        Ok(std::iter::once(message).take(max).collect())
    }
}

/// Gmail REST API v1 with a pre-issued OAuth access token.
pub struct GmailMailbox {
    api_base: String,
    token: String,
    client: Client,
}

impl GmailMailbox {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("mailscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    pub fn from_config(cfg: &MailboxConfig) -> Result<Self> {
        let token = std::env::var(&cfg.token_env)
            .with_context(|| format!("Gmail token env var '{}' not set", cfg.token_env))?;
        Self::new(cfg.api_base.clone(), token, cfg.timeout_seconds)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let max_retries = 3;
        let mut last_error = None;

        for attempt in 1..=max_retries {
            if attempt > 1 {
                let backoff = Duration::from_secs(2u64.pow(attempt - 2));
                info!(url, attempt, ?backoff, "retrying Gmail request");
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).bearer_auth(&self.token).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to parse Gmail response from {}", url));
                    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(anyhow::anyhow!("Gmail returned {}", status));
                        continue;
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        anyhow::bail!("Gmail request failed with status {}: {}", status, body);
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::new(e).context("network error during Gmail request"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
    }
}

#[async_trait::async_trait]
impl Mailbox for GmailMailbox {
    async fn recent(&self, max: usize) -> Result<Vec<EmailMessage>> {
        let list: MessageList = self
            .get_json(
                &format!("{}/users/me/messages", self.api_base),
                &[("labelIds", "INBOX".to_string()), ("maxResults", max.to_string())],
            )
            .await
            .context("listing inbox messages")?;
        debug!(count = list.messages.len(), "Gmail listed messages");

        let mut out = Vec::with_capacity(list.messages.len());
        for msg in list.messages.iter().take(max) {
            let full: GmailMessage = self
                .get_json(
                    &format!("{}/users/me/messages/{}", self.api_base, msg.id),
                    &[("format", "full".to_string())],
                )
                .await
                .with_context(|| format!("fetching message {}", msg.id))?;

            out.push(EmailMessage {
                subject: full.payload.header("Subject").unwrap_or_default().to_string(),
                text: extract_body(&full.payload),
                snippet: full.snippet,
                id: full.id,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Part,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Body,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl Part {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<]+?>").unwrap());

/// Gmail body data is base64url; padding may or may not be present.
fn decode_body(data: &str) -> Option<String> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 80) {
        Ok(text) => text,
        Err(e) => {
            debug!(%e, "html2text failed, stripping tags");
            HTML_TAG.replace_all(html, "").into_owned()
        }
    }
}

fn part_text(part: &Part) -> String {
    let Some(data) = part.body.data.as_deref().filter(|d| !d.is_empty()) else {
        return String::new();
    };
    match part.mime_type.as_str() {
        "text/plain" => decode_body(data).unwrap_or_default(),
        "text/html" => decode_body(data).map(|html| html_to_text(&html)).unwrap_or_default(),
        _ => String::new(),
    }
}

/// Top-level body first, then the first readable part, then the first readable
/// part one level down.
pub fn extract_body(payload: &Part) -> String {
    if let Some(text) = payload
        .body
        .data
        .as_deref()
        .filter(|d| !d.is_empty())
        .and_then(decode_body)
    {
        if payload.mime_type == "text/html" {
            return html_to_text(&text).trim().to_string();
        }
        return text;
    }

    for part in &payload.parts {
        let text = part_text(part);
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
        for sub in &part.parts {
            let text = part_text(sub);
            if !text.trim().is_empty() {
                return text.trim().to_string();
            }
        }
    }

    NO_BODY.to_string()
}
