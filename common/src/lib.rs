/*!
common/src/lib.rs

Shared configuration types and DB helper functions for mailscope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an override file
- Helpers to initialize and migrate an SQLite database
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// HTTP server section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0")
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/mailscope.db")
    pub path: String,
}

/// Remote LLM endpoint (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config. Task-specific endpoints fall back to `remote`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
    /// Per-language summarization endpoints, keyed by language tag ("en", "ko")
    #[serde(default)]
    pub summarization: BTreeMap<String, RemoteLlmConfig>,
    pub classification: Option<RemoteLlmConfig>,
    pub translation: Option<RemoteLlmConfig>,
}

impl LlmConfig {
    /// Resolve the endpoint for a task, falling back to the shared `remote` section.
    pub fn endpoint<'a>(&'a self, task: Option<&'a RemoteLlmConfig>) -> Option<&'a RemoteLlmConfig> {
        task.or(self.remote.as_ref())
    }

    pub fn summarization_endpoint(&self, lang: &str) -> Option<&RemoteLlmConfig> {
        self.endpoint(self.summarization.get(lang))
    }
}

/// One overridden length budget (tokens)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub first_max: usize,
    pub first_min: usize,
    pub final_max: usize,
    pub final_min: usize,
}

/// Chunked summarization tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub chunk_overlap: usize,
    pub reduce_overlap: usize,
    pub safety_margin: usize,
    pub min_window: usize,
    /// Re-reduce when more partial summaries than this were produced
    pub reduce_max_partials: usize,
    /// Re-reduce when the combined partial summaries exceed this many characters
    pub reduce_max_chars: usize,
    pub fallback_sentences: usize,
    pub default_cap_en: usize,
    pub default_cap_ko: usize,
    pub tokenizer_path_en: Option<String>,
    pub tokenizer_path_ko: Option<String>,
    /// Budget overrides keyed by language then mode, e.g. `[summarizer.budgets.en.fast]`
    pub budgets: BTreeMap<String, BTreeMap<String, BudgetConfig>>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            chunk_overlap: 50,
            reduce_overlap: 20,
            safety_margin: 32,
            min_window: 128,
            reduce_max_partials: 2,
            reduce_max_chars: 1500,
            fallback_sentences: 2,
            default_cap_en: 1024,
            default_cap_ko: 512,
            tokenizer_path_en: None,
            tokenizer_path_ko: None,
            budgets: BTreeMap::new(),
        }
    }
}

/// Sentiment classification tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    /// Only this many leading characters are sent to the model
    pub model_prefix_chars: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            model_prefix_chars: 512,
        }
    }
}

/// External reply-generation process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
    pub heartbeat_seconds: u64,
    /// Upper bound on simultaneously running reply processes
    pub max_concurrent: usize,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "ollama".to_string(),
            args: vec!["run".to_string(), "gemma3:4b".to_string()],
            timeout_seconds: 120,
            heartbeat_seconds: 3,
            max_concurrent: 2,
        }
    }
}

/// Mailbox collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub provider: String, // "gmail", "sample", "none"
    /// Env var holding a Gmail OAuth access token
    pub token_env: String,
    pub api_base: String,
    pub max_results: usize,
    pub timeout_seconds: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            provider: "sample".to_string(),
            token_env: "GMAIL_ACCESS_TOKEN".to_string(),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            max_results: 10,
            timeout_seconds: 15,
        }
    }
}

/// Admin / maintenance config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    pub auto_migrate: Option<bool>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub sentiment: SentimentConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    pub admin: Option<AdminConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Run SQL migrations from the workspace `migrations` directory against the given pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .context("Failed to run sqlx migrations")?;

    Ok(())
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory and the DB file when missing, so permission or path
/// problems surface here rather than on the first query. Uses a small pool (5 connections)
/// and WAL journaling.
///
/// Example:
///   let pool = init_db_pool("data/mailscope.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to create or open DB file: {}", path))?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
