//! Run the built-in labelled e-mails through the summarizer and the sentiment
//! classifier and print overlap and accuracy figures.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::Config;
use tracing_subscriber::{fmt, EnvFilter};

use mailscope::evaluation::{evaluate, SAMPLES};
use mailscope::registry::CapabilityRegistry;
use mailscope::sentiment::SentimentClassifier;
use mailscope::summarizer::budget::Mode;
use mailscope::summarizer::SummarizationController;

#[derive(Parser, Debug)]
#[command(name = "evaluate", about = "Evaluate summaries and sentiment against labelled samples")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Summarization mode (fast, hybrid, llm)
    #[arg(long, default_value = "fast")]
    mode: Mode,

    /// Print the report as JSON instead of a table
    #[arg(long)]
    json: bool,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn preview(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    if text.chars().count() > width {
        out.push_str("...");
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        args.config.as_deref(),
    )
    .await?;

    let registry = Arc::new(CapabilityRegistry::from_config(&config));
    let controller = SummarizationController::from_config(registry.clone(), &config.summarizer);
    let classifier = SentimentClassifier::new(registry.classifier(), config.sentiment.model_prefix_chars);

    let report = evaluate(SAMPLES, &controller, &classifier, args.mode).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n===== Evaluation Results =====\n");
    println!("{:>5} | {:>7} | {:<8} | {:<8} | {:<8} | {:>5}", "Index", "Jaccard", "Gold", "Pred", "Label", "Score");
    println!("{}", "-".repeat(60));
    for r in &report.results {
        println!(
            "{:>5} | {:>7.2} | {:<8} | {:<8} | {:<8} | {:>5.2}",
            r.index, r.jaccard, r.gold_sentiment, r.predicted_sentiment, r.sentiment_label, r.sentiment_score
        );
    }
    println!(
        "\nOverall Sentiment Accuracy: {:.2} ({}/{})",
        report.sentiment_accuracy(),
        report.correct_sentiment,
        report.results.len()
    );
    println!("Mean Jaccard: {:.2}\n", report.mean_jaccard());

    for (sample, r) in SAMPLES.iter().zip(&report.results) {
        println!("[{}] {}", r.index, preview(sample.email, 60));
        println!("    gold: {}", sample.gold_summary);
        println!("    gen.: {}", r.generated_summary);
    }
    Ok(())
}
