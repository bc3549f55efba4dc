use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::Config;
use mailscope::capability::{CapabilityResult, RawClassification, Summarize, Translate, Classify};
use mailscope::language::Language;
use mailscope::mailbox::SampleMailbox;
use mailscope::registry::CapabilityRegistry;
use mailscope::reply::{ReplyEvent, ReplyWorker, UNAVAILABLE_WARNING};
use mailscope::server::{build_rocket, AppState};
use mailscope::summarizer::budget::LengthBudget;
use mailscope::summarizer::SummarizerProfile;
use mailscope::tokenizer::HeuristicTokenizer;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

struct CountingSummarizer {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Summarize for CountingSummarizer {
    async fn summarize(&self, _text: &str, _budget: LengthBudget) -> CapabilityResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Short summary.".to_string())
    }
}

struct FixedClassifier;

#[async_trait::async_trait]
impl Classify for FixedClassifier {
    async fn classify(&self, _text: &str) -> CapabilityResult<RawClassification> {
        Ok(RawClassification {
            label: "5 stars".to_string(),
            score: 0.9,
        })
    }
}

struct UpperTranslator;

#[async_trait::async_trait]
impl Translate for UpperTranslator {
    async fn translate(&self, text: &str, target: Language) -> CapabilityResult<String> {
        Ok(format!("[{}] {}", target.as_tag(), text.to_uppercase()))
    }
}

struct CannedReplier;

#[async_trait::async_trait]
impl ReplyWorker for CannedReplier {
    async fn invoke(&self, _prompt: &str, _timeout: Duration) -> CapabilityResult<String> {
        Ok("Reply: Thanks, I will review it tomorrow.".to_string())
    }

    fn stream(&self, _prompt: String, _timeout: Duration) -> mpsc::Receiver<ReplyEvent> {
        let (tx, rx) = mpsc::channel(8);
        let _ = tx.try_send(ReplyEvent::Chunk("Hello Alice,".to_string()));
        let _ = tx.try_send(ReplyEvent::Keepalive);
        let _ = tx.try_send(ReplyEvent::Chunk("Will do.".to_string()));
        let _ = tx.try_send(ReplyEvent::Done);
        rx
    }
}

fn config() -> Config {
    toml::from_str("").expect("empty config")
}

fn full_registry(summarizer: Arc<CountingSummarizer>) -> CapabilityRegistry {
    CapabilityRegistry::empty()
        .with_summarizer(SummarizerProfile::new(
            Language::English,
            summarizer,
            Arc::new(HeuristicTokenizer::new()),
            1024,
        ))
        .with_classifier(Arc::new(FixedClassifier))
        .with_translator(Arc::new(UpperTranslator))
        .with_replier(Arc::new(CannedReplier))
        .with_mailbox(Arc::new(SampleMailbox))
}

async fn client_with(registry: CapabilityRegistry, db: Option<SqlitePool>) -> Client {
    let state = AppState::new(&config(), Arc::new(registry), db);
    Client::tracked(build_rocket(state, rocket::Config::figment()))
        .await
        .expect("valid rocket instance")
}

async fn rule_only_client() -> Client {
    client_with(CapabilityRegistry::empty(), None).await
}

async fn post_json(client: &Client, path: &str, body: Value) -> (Status, Value) {
    let response = client
        .post(path)
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;
    let status = response.status();
    let value = response.into_json::<Value>().await.unwrap_or(Value::Null);
    (status, value)
}

#[rocket::async_test]
async fn test_health_and_status() {
    let client = rule_only_client().await;

    let response = client.get("/health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.as_deref(), Some("OK"));

    let response = client.get("/api/v1/status").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], false);
    let capabilities = body["capabilities"].as_array().unwrap();
    assert_eq!(capabilities.len(), 6);
    assert!(capabilities.iter().all(|c| c["available"] == false));
}

#[rocket::async_test]
async fn test_summarize_validation_and_empty_text() {
    let client = rule_only_client().await;

    let (status, body) = post_json(&client, "/summarize", json!({ "text": "", "lang": "auto", "mode": "fast" })).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["summary"], "");

    let (status, body) = post_json(&client, "/summarize", json!({ "text": "Hi.", "mode": "turbo" })).await;
    assert_eq!(status, Status::BadRequest);
    assert!(body["error"].as_str().unwrap().contains("mode"));

    let (status, _) = post_json(&client, "/summarize", json!({ "text": "Hi.", "lang": "fr" })).await;
    assert_eq!(status, Status::BadRequest);
}

#[rocket::async_test]
async fn test_summarize_without_model_uses_extractive_fallback() {
    let client = rule_only_client().await;
    let text = "The release is on Monday. QA signs off on Friday. Marketing follows later.";
    let (status, body) = post_json(&client, "/summarize", json!({ "text": text })).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["summary"], "The release is on Monday. QA signs off on Friday.");
}

#[rocket::async_test]
async fn test_summarize_short_text_is_one_model_call() {
    let summarizer = Arc::new(CountingSummarizer {
        calls: AtomicUsize::new(0),
    });
    let client = client_with(full_registry(summarizer.clone()), None).await;
    let (status, body) = post_json(
        &client,
        "/summarize",
        json!({ "text": "Can you review the report by tomorrow?", "lang": "en", "mode": "hybrid" }),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["summary"], "Short summary.");
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
}

#[rocket::async_test]
async fn test_sentiment_scenarios() {
    let client = rule_only_client().await;

    let (status, body) = post_json(
        &client,
        "/sentiment",
        json!({ "text": "Hi John, Can you review the attached report by tomorrow?" }),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["mapped_category"], "neutral");

    let (status, body) = post_json(
        &client,
        "/sentiment",
        json!({ "text": "There was an error in the build and a delay in the release." }),
    )
    .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["mapped_category"], "negative");
    assert_eq!(body["score"], 0.95);

    let (status, body) = post_json(&client, "/sentiment", json!({ "text": "   " })).await;
    assert_eq!(status, Status::BadRequest);
    assert!(body["error"].is_string());
}

#[rocket::async_test]
async fn test_translate() {
    let client = rule_only_client().await;

    let (status, body) = post_json(&client, "/translate", json!({ "text": "Hello", "target_lang": "fr" })).await;
    assert_eq!(status, Status::BadRequest);
    assert!(body["error"].as_str().unwrap().contains("target_lang"));

    let (status, body) = post_json(&client, "/translate", json!({ "text": "Hello", "target_lang": "ko" })).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["translated"], "Hello");

    let client = client_with(
        full_registry(Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        })),
        None,
    )
    .await;
    let (_, body) = post_json(&client, "/translate", json!({ "text": "Hello", "target_lang": "ko" })).await;
    assert_eq!(body["translated"], "[ko] HELLO");

    let (_, body) = post_json(&client, "/translate", json!({ "text": "Hello", "target_lang": "en" })).await;
    assert_eq!(body["translated"], "Hello");
}

#[rocket::async_test]
async fn test_reply_and_stream() {
    let client = rule_only_client().await;
    let (status, body) = post_json(&client, "/reply", json!({ "text": "Can we meet?" })).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["reply"], UNAVAILABLE_WARNING);

    let response = client
        .post("/reply_stream")
        .header(ContentType::JSON)
        .body(json!({ "text": "Can we meet?" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let stream = response.into_string().await.unwrap();
    assert!(stream.contains("error"));
    assert!(stream.contains(UNAVAILABLE_WARNING));

    let client = client_with(
        full_registry(Arc::new(CountingSummarizer {
            calls: AtomicUsize::new(0),
        })),
        None,
    )
    .await;
    let (_, body) = post_json(&client, "/reply", json!({ "text": "Please review the report.", "lang": "en" })).await;
    assert_eq!(body["reply"], "Thanks, I will review it tomorrow.");

    let response = client
        .post("/reply_stream")
        .header(ContentType::JSON)
        .body(json!({ "text": "Please review the report." }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.content_type(), Some(ContentType::EventStream));
    let stream = response.into_string().await.unwrap();
    let hello = stream.find("Hello Alice,").unwrap();
    let will_do = stream.find("Will do.").unwrap();
    let done = stream.find("done").unwrap();
    assert!(hello < will_do && will_do < done);
    assert!(stream.contains("keepalive"));

    let (status, _) = post_json(&client, "/reply_stream", json!({ "text": "" })).await;
    assert_eq!(status, Status::BadRequest);
}

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    mailscope::storage::ensure_schema(&pool).await.unwrap();
    pool
}

#[rocket::async_test]
async fn test_process_strips_signature_and_persists() {
    let client = rule_only_client().await;
    let text = "Great work on the launch, the client is thrilled.\n\nSent from my iPhone";
    let (status, body) = post_json(&client, "/process", json!({ "text": text })).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["summary"], "Great work on the launch, the client is thrilled.");
    assert_eq!(body["sentiment"]["mapped_category"], "positive");
    assert!(body.get("analysis_id").is_none());

    let pool = memory_pool().await;
    let client = client_with(CapabilityRegistry::empty(), Some(pool.clone())).await;
    let (status, body) = post_json(
        &client,
        "/process",
        json!({ "text": text, "email_id": "m-1", "subject": "Launch" }),
    )
    .await;
    assert_eq!(status, Status::Ok);
    let id = body["analysis_id"].as_i64().unwrap();

    let response = client.get("/api/analyses?limit=5").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let rows: Value = response.into_json().await.unwrap();
    assert_eq!(rows[0]["id"], id);
    assert_eq!(rows[0]["email_id"], "m-1");
    assert_eq!(rows[0]["cleaned_body"], "Great work on the launch, the client is thrilled.");

    let (status, _) = post_json(&client, "/process", json!({ "text": "" })).await;
    assert_eq!(status, Status::BadRequest);
}

#[rocket::async_test]
async fn test_process_with_reply_persists_draft() {
    let pool = memory_pool().await;
    let summarizer = Arc::new(CountingSummarizer {
        calls: AtomicUsize::new(0),
    });
    let client = client_with(full_registry(summarizer), Some(pool)).await;

    let text = "Can you review the attached report by tomorrow?\n\nBest regards,\nAlice";
    let (status, body) = post_json(&client, "/process", json!({ "text": text, "reply": true })).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["summary"], "Short summary.");
    assert_eq!(body["reply"], "Thanks, I will review it tomorrow.");

    let response = client.get("/api/analyses").dispatch().await;
    let rows: Value = response.into_json().await.unwrap();
    assert_eq!(rows[0]["id"], body["analysis_id"]);
    assert_eq!(rows[0]["reply"], "Thanks, I will review it tomorrow.");

    // without the flag no reply is drafted or stored
    let (_, body) = post_json(&client, "/process", json!({ "text": text })).await;
    assert!(body.get("reply").is_none());
    let response = client.get("/api/analyses").dispatch().await;
    let rows: Value = response.into_json().await.unwrap();
    assert_eq!(rows[0]["id"], body["analysis_id"]);
    assert!(rows[0]["reply"].is_null());
}

#[rocket::async_test]
async fn test_analyses_without_database() {
    let client = rule_only_client().await;
    let response = client.get("/api/analyses").dispatch().await;
    assert_eq!(response.status(), Status::ServiceUnavailable);
}

#[rocket::async_test]
async fn test_emails_endpoint() {
    let client = rule_only_client().await;
    let response = client.get("/api/emails").dispatch().await;
    assert_eq!(response.status(), Status::ServiceUnavailable);
    let body: Value = response.into_json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("mailbox"));

    let client = client_with(CapabilityRegistry::empty().with_mailbox(Arc::new(SampleMailbox)), None).await;
    let response = client.get("/api/emails").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let messages: Value = response.into_json().await.unwrap();
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    for field in ["id", "subject", "snippet", "text"] {
        assert!(messages[0][field].is_string());
    }
}

#[rocket::async_test]
async fn test_errors_are_json() {
    let client = rule_only_client().await;

    let response = client.get("/nope").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    let body: Value = response.into_json().await.unwrap();
    assert!(body["error"].is_string());

    let response = client
        .post("/summarize")
        .header(ContentType::JSON)
        .body("{not json")
        .dispatch()
        .await;
    assert!(response.status().class().is_client_error());
    let body: Value = response.into_json().await.unwrap();
    assert!(body["error"].is_string());
}
