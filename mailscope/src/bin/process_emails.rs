//! Summarize, classify and draft a reply for the most recent mailbox messages,
//! printing each result and storing it when a database is configured.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::{init_db_pool, Config};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mailscope::capability::Capability;
use mailscope::language::LanguageTag;
use mailscope::pipeline::{self, Provenance};
use mailscope::registry::CapabilityRegistry;
use mailscope::reply::ReplyService;
use mailscope::sentiment::SentimentClassifier;
use mailscope::storage;
use mailscope::summarizer::budget::Mode;
use mailscope::summarizer::SummarizationController;

#[derive(Parser, Debug)]
#[command(name = "process_emails", about = "Analyse the latest inbox messages")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of messages (defaults to mailbox.max_results)
    #[arg(long)]
    max: Option<usize>,

    /// Summary mode: fast, llm or hybrid
    #[arg(long, default_value = "fast")]
    mode: String,

    /// Skip reply drafting
    #[arg(long)]
    no_reply: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let mode: Mode = args.mode.parse()?;
    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        args.config.as_deref(),
    )
    .await?;

    let db = match &config.database {
        Some(db) => {
            let pool = init_db_pool(&db.path).await?;
            storage::ensure_schema(&pool).await?;
            Some(pool)
        }
        None => None,
    };

    let registry = Arc::new(CapabilityRegistry::from_config(&config));
    let mailbox = match registry.mailbox() {
        Capability::Available(mailbox) => mailbox,
        Capability::Unavailable { reason } => anyhow::bail!("mailbox unavailable: {}", reason),
    };
    let controller = SummarizationController::from_config(registry.clone(), &config.summarizer);
    let classifier = SentimentClassifier::new(registry.classifier(), config.sentiment.model_prefix_chars);
    let replies = ReplyService::new(
        registry.replier(),
        Duration::from_secs(config.reply.timeout_seconds.max(1)),
    );

    let messages = mailbox
        .recent(args.max.unwrap_or(config.mailbox.max_results))
        .await
        .context("fetching recent messages")?;
    info!(count = messages.len(), "processing messages");

    for (i, message) in messages.into_iter().enumerate() {
        let analysis = pipeline::analyze(
            &controller,
            &classifier,
            (!args.no_reply).then_some(&replies),
            &message.text,
            LanguageTag::Auto,
            mode,
        )
        .await;

        println!("\n===== Email {} =====", i + 1);
        println!("Subject: {}", message.subject);
        println!("\nSummary:\n{}", analysis.summary);
        println!(
            "\nSentiment: {} ({:.2}, {})",
            analysis.sentiment.label, analysis.sentiment.score, analysis.sentiment.mapped_category
        );
        if let Some(reply) = &analysis.reply {
            println!("\nSuggested reply:\n{}", reply);
        }

        if let Some(pool) = &db {
            let record = analysis.into_record(
                &message.text,
                Provenance {
                    email_id: Some(message.id.clone()),
                    sender: None,
                    subject: Some(message.subject.clone()),
                },
            );
            match storage::save_analysis(pool, &record).await {
                Ok(id) => info!(id, email_id = %message.id, "analysis stored"),
                Err(e) => error!(error = %format!("{:#}", e), email_id = %message.id, "failed to store analysis"),
            }
        }
    }
    Ok(())
}
