//! Print a preview of the most recent mailbox messages.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use tracing_subscriber::{fmt, EnvFilter};

use mailscope::capability::Capability;
use mailscope::cleaner::strip_signature;
use mailscope::registry::CapabilityRegistry;

#[derive(Parser, Debug)]
#[command(name = "fetch_emails", about = "Print the latest inbox messages")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of messages (defaults to mailbox.max_results)
    #[arg(long)]
    max: Option<usize>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        args.config.as_deref(),
    )
    .await?;

    let registry = CapabilityRegistry::from_config(&config);
    let mailbox = match registry.mailbox() {
        Capability::Available(mailbox) => mailbox,
        Capability::Unavailable { reason } => anyhow::bail!("mailbox unavailable: {}", reason),
    };

    let messages = mailbox
        .recent(args.max.unwrap_or(config.mailbox.max_results))
        .await
        .context("fetching recent messages")?;

    for (i, message) in messages.iter().enumerate() {
        let body: String = strip_signature(&message.text).chars().take(500).collect();
        println!("\n----- Email {} -----\nSubject: {}\n{}...\n", i + 1, message.subject, body);
    }
    Ok(())
}
