use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// One processed e-mail as persisted in `email_analysis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAnalysis {
    pub email_id: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub original_body: String,
    pub cleaned_body: String,
    pub summary: String,
    pub sentiment_label: String,
    pub sentiment_score: f64,
    pub reply: Option<String>,
}

/// A stored row, as returned by `GET /api/analyses`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredAnalysis {
    pub id: i64,
    pub email_id: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub cleaned_body: String,
    pub summary: String,
    pub sentiment_label: String,
    pub sentiment_score: f64,
    pub reply: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

/// Create the analysis table when migrations were not run.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    info!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS email_analysis (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email_id TEXT,
            sender TEXT,
            subject TEXT,
            original_body TEXT NOT NULL,
            cleaned_body TEXT NOT NULL,
            summary TEXT NOT NULL,
            sentiment_label TEXT NOT NULL,
            sentiment_score REAL NOT NULL,
            reply TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_email_analysis_email_id ON email_analysis(email_id)",
    ];
    for stmt in stmts {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .context("failed to create email_analysis schema")?;
    }
    Ok(())
}

/// Insert one analysis and return its row id.
pub async fn save_analysis(pool: &SqlitePool, analysis: &EmailAnalysis) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO email_analysis
        (email_id, sender, subject, original_body, cleaned_body, summary, sentiment_label, sentiment_score, reply)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&analysis.email_id)
    .bind(&analysis.sender)
    .bind(&analysis.subject)
    .bind(&analysis.original_body)
    .bind(&analysis.cleaned_body)
    .bind(&analysis.summary)
    .bind(&analysis.sentiment_label)
    .bind(analysis.sentiment_score)
    .bind(&analysis.reply)
    .fetch_one(pool)
    .await
    .context("failed to insert email analysis")?;

    debug!(id, email_id = ?analysis.email_id, "stored email analysis");
    Ok(id)
}

/// Most recent analyses first.
pub async fn recent_analyses(pool: &SqlitePool, limit: i64) -> Result<Vec<StoredAnalysis>> {
    sqlx::query_as::<_, StoredAnalysis>(
        r#"
        SELECT id, email_id, sender, subject, cleaned_body, summary,
               sentiment_label, sentiment_score, reply, created_at
        FROM email_analysis
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to load email analyses")
}
