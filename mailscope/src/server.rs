use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::stream::{Event, EventStream};
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use common::{Config, ServerConfig};

use crate::capability::Capability;
use crate::cleaner::strip_signature;
use crate::language::{InvalidChoice, Language, LanguageTag};
use crate::mailbox::EmailMessage;
use crate::pipeline::{self, Provenance};
use crate::registry::{CapabilityRegistry, CapabilityStatus};
use crate::reply::{ReplyEvent, ReplyService};
use crate::sentiment::{SentimentClassifier, SentimentVerdict};
use crate::storage::{self, StoredAnalysis};
use crate::summarizer::budget::Mode;
use crate::summarizer::SummarizationController;

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub registry: Arc<CapabilityRegistry>,
    pub controller: SummarizationController,
    pub classifier: SentimentClassifier,
    pub replies: ReplyService,
    pub mailbox_max_results: usize,
    pub db: Option<SqlitePool>,
}

impl AppState {
    pub fn new(config: &Config, registry: Arc<CapabilityRegistry>, db: Option<SqlitePool>) -> Self {
        Self {
            started_at: Utc::now(),
            controller: SummarizationController::from_config(registry.clone(), &config.summarizer),
            classifier: SentimentClassifier::new(registry.classifier(), config.sentiment.model_prefix_chars),
            replies: ReplyService::new(
                registry.replier(),
                Duration::from_secs(config.reply.timeout_seconds.max(1)),
            ),
            mailbox_max_results: config.mailbox.max_results,
            registry,
            db,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A request-level failure rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: Status,
    message: String,
}

impl ApiError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, message)
    }
}

impl From<InvalidChoice> for ApiError {
    fn from(e: InvalidChoice) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        (self.status, Json(ErrorBody { error: self.message })).respond_to(req)
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct SummarizeRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    lang: String,
    #[serde(default)]
    mode: String,
}

#[derive(Debug, Serialize)]
struct SummarizeResponse {
    summary: String,
}

#[derive(Debug, Deserialize)]
struct TextRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    lang: String,
}

#[derive(Debug, Serialize)]
struct ReplyResponse {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct TranslateRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    target_lang: String,
}

#[derive(Debug, Serialize)]
struct TranslateResponse {
    translated: String,
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    lang: String,
    #[serde(default)]
    mode: String,
    email_id: Option<String>,
    sender: Option<String>,
    subject: Option<String>,
    /// Also draft a reply and store it with the analysis
    #[serde(default)]
    reply: bool,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    summary: String,
    sentiment: SentimentVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis_id: Option<i64>,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    database: bool,
    capabilities: Vec<CapabilityStatus>,
}

fn require_text(text: &str) -> std::result::Result<(), ApiError> {
    if text.trim().is_empty() {
        Err(ApiError::bad_request("text is required"))
    } else {
        Ok(())
    }
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Uptime plus the startup decision for every capability slot.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        database: state.db.is_some(),
        capabilities: state.registry.availability(),
    })
}

#[post("/summarize", data = "<body>")]
async fn summarize(state: &State<AppState>, body: Json<SummarizeRequest>) -> ApiResult<SummarizeResponse> {
    let lang: LanguageTag = body.lang.parse()?;
    let mode: Mode = body.mode.parse()?;
    let summary = state.controller.summarize(&body.text, lang, mode).await;
    Ok(Json(SummarizeResponse { summary }))
}

#[post("/sentiment", data = "<body>")]
async fn sentiment(state: &State<AppState>, body: Json<TextRequest>) -> ApiResult<SentimentVerdict> {
    require_text(&body.text)?;
    Ok(Json(state.classifier.classify(&body.text).await))
}

#[post("/reply", data = "<body>")]
async fn reply(state: &State<AppState>, body: Json<TextRequest>) -> ApiResult<ReplyResponse> {
    require_text(&body.text)?;
    let language = body.lang.parse::<LanguageTag>()?.resolve(&body.text);
    let reply = state.replies.draft(&body.text, language).await;
    Ok(Json(ReplyResponse { reply }))
}

/// Server-sent events: one `data` frame per output line, `: keepalive` comments while
/// the generator is silent, then a terminal `done` or `error` event. Dropping the
/// connection drops the receiver, which stops the generator process.
#[post("/reply_stream", data = "<body>")]
fn reply_stream(
    state: &State<AppState>,
    body: Json<TextRequest>,
) -> std::result::Result<EventStream![], ApiError> {
    require_text(&body.text)?;
    let language = body.lang.parse::<LanguageTag>()?.resolve(&body.text);
    let mut rx = state.replies.stream(&body.text, language);

    let stream = EventStream! {
        while let Some(event) = rx.recv().await {
            match event {
                ReplyEvent::Chunk(line) => {
                    yield Event::data(line);
                }
                ReplyEvent::Keepalive => {
                    yield Event::comment("keepalive");
                }
                ReplyEvent::Done => {
                    yield Event::data("").event("done");
                    break;
                }
                ReplyEvent::Error(message) => {
                    yield Event::data(message).event("error");
                    break;
                }
            }
        }
    };
    Ok(stream.heartbeat(None::<Duration>))
}

#[post("/translate", data = "<body>")]
async fn translate(state: &State<AppState>, body: Json<TranslateRequest>) -> ApiResult<TranslateResponse> {
    let target: Language = body.target_lang.parse().map_err(|e: InvalidChoice| {
        ApiError::bad_request(format!("target_lang must be 'en' or 'ko' ({})", e.value))
    })?;
    let text = body.text.trim();
    if text.is_empty() || LanguageTag::Auto.resolve(text) == target {
        return Ok(Json(TranslateResponse {
            translated: text.to_string(),
        }));
    }

    let translated = match state.registry.translator() {
        Capability::Available(translator) => match translator.translate(text, target).await {
            Ok(out) if !out.trim().is_empty() => out.trim().to_string(),
            Ok(_) => {
                warn!(%target, "translator returned nothing, returning original text");
                text.to_string()
            }
            Err(e) => {
                warn!(%target, %e, "translation failed, returning original text");
                text.to_string()
            }
        },
        Capability::Unavailable { reason } => {
            warn!(%target, %reason, "no translator available, returning original text");
            text.to_string()
        }
    };
    Ok(Json(TranslateResponse { translated }))
}

/// Signature stripping, summary, sentiment and (on request) a reply draft in one
/// call, persisted when a database is configured.
#[post("/process", data = "<body>")]
async fn process(state: &State<AppState>, body: Json<ProcessRequest>) -> ApiResult<ProcessResponse> {
    require_text(&body.text)?;
    let lang: LanguageTag = body.lang.parse()?;
    let mode: Mode = body.mode.parse()?;

    let replies = body.reply.then_some(&state.replies);
    let analysis = pipeline::analyze(&state.controller, &state.classifier, replies, &body.text, lang, mode).await;
    let summary = analysis.summary.clone();
    let sentiment = analysis.sentiment.clone();
    let drafted = analysis.reply.clone();

    let analysis_id = match &state.db {
        Some(pool) => {
            let record = analysis.into_record(
                &body.text,
                Provenance {
                    email_id: body.email_id.clone(),
                    sender: body.sender.clone(),
                    subject: body.subject.clone(),
                },
            );
            let id = storage::save_analysis(pool, &record).await.map_err(|e| {
                error!(error = %format!("{:#}", e), "failed to persist analysis");
                ApiError::new(Status::InternalServerError, "failed to store analysis")
            })?;
            Some(id)
        }
        None => None,
    };

    Ok(Json(ProcessResponse {
        summary,
        sentiment,
        reply: drafted,
        analysis_id,
    }))
}

#[get("/api/emails")]
async fn list_emails(state: &State<AppState>) -> ApiResult<Vec<EmailMessage>> {
    let mailbox = match state.registry.mailbox() {
        Capability::Available(mailbox) => mailbox,
        Capability::Unavailable { reason } => {
            return Err(ApiError::new(
                Status::ServiceUnavailable,
                format!("mailbox unavailable: {}", reason),
            ))
        }
    };

    let messages = mailbox.recent(state.mailbox_max_results).await.map_err(|e| {
        error!(error = %format!("{:#}", e), "mailbox fetch failed");
        ApiError::new(Status::BadGateway, format!("mailbox fetch failed: {}", e))
    })?;

    Ok(Json(
        messages
            .into_iter()
            .map(|m| EmailMessage {
                text: strip_signature(&m.text),
                ..m
            })
            .collect(),
    ))
}

#[get("/api/analyses?<limit>")]
async fn list_analyses(state: &State<AppState>, limit: Option<i64>) -> ApiResult<Vec<StoredAnalysis>> {
    let pool = state
        .db
        .as_ref()
        .ok_or_else(|| ApiError::new(Status::ServiceUnavailable, "no database configured"))?;
    let rows = storage::recent_analyses(pool, limit.unwrap_or(50).clamp(1, 500))
        .await
        .map_err(|e| {
            error!(error = %format!("{:#}", e), "failed to load analyses");
            ApiError::new(Status::InternalServerError, "failed to load analyses")
        })?;
    Ok(Json(rows))
}

#[catch(default)]
fn json_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let error = status.reason().unwrap_or("request failed").to_string();
    (status, Json(ErrorBody { error }))
}

/// Rocket instance with all routes mounted; used by `launch_rocket` and by tests.
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount(
            "/",
            routes![
                health,
                status,
                summarize,
                sentiment,
                reply,
                reply_stream,
                translate,
                process,
                list_emails,
                list_analyses,
            ],
        )
        .register("/", catchers![json_catcher])
}

/// Launch the HTTP server on the configured address and port.
///
/// Blocks until Rocket shuts down (SIGINT/SIGTERM) and returns an error if Rocket
/// fails to start.
pub async fn launch_rocket(state: AppState, server: &ServerConfig) -> Result<()> {
    let mut fig = rocket::Config::figment();
    if let Some(bind) = &server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = server.port {
        fig = fig.merge(("port", port));
    }

    info!("Starting Rocket HTTP server");
    build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    info!("Rocket HTTP server has shut down");
    Ok(())
}
