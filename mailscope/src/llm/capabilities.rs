//! Summarize / Classify / Translate realised by prompting a chat-completion provider.

use std::sync::Arc;

use serde::Deserialize;

use super::{extract_json_from_text, LlmProvider, LlmRequest};
use crate::capability::{
    CapabilityError, CapabilityResult, Classify, RawClassification, Summarize, Translate,
};
use crate::language::Language;
use crate::reply::postprocess::{strip_echoed_prompt, SUMMARY_MARKERS};
use crate::summarizer::budget::LengthBudget;

pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    language: Language,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, language: Language) -> Self {
        Self { provider, language }
    }

    fn prompt(&self, text: &str, budget: LengthBudget) -> String {
        match self.language {
            Language::English => format!(
                "Summarize the following email text briefly. Use between {} and {} tokens. \
                 Keep names, dates and requested actions. Do not add commentary.\n\n{}\n\nSummary:",
                budget.min_length, budget.max_length, text
            ),
            Language::Korean => format!(
                "다음 이메일 내용을 한국어로 간결하게 요약하세요. {}~{} 토큰 분량으로 작성하고, \
                 이름, 날짜, 요청 사항을 유지하세요.\n\n{}\n\n요약:",
                budget.min_length, budget.max_length, text
            ),
        }
    }
}

#[async_trait::async_trait]
impl Summarize for LlmSummarizer {
    async fn summarize(&self, text: &str, budget: LengthBudget) -> CapabilityResult<String> {
        let request = LlmRequest {
            max_tokens: Some(budget.max_length),
            temperature: Some(0.2),
            ..LlmRequest::new(self.prompt(text, budget))
        };
        let response = self.provider.generate(request).await?;
        let summary = strip_echoed_prompt(&response.content, SUMMARY_MARKERS).trim();
        if summary.is_empty() {
            return Err(CapabilityError::Malformed("empty summary".to_string()));
        }
        Ok(summary.to_string())
    }
}

pub struct LlmClassifier {
    provider: Arc<dyn LlmProvider>,
}

#[derive(Debug, Deserialize)]
struct ClassificationJson {
    label: String,
    #[serde(default)]
    score: Option<f64>,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Classify for LlmClassifier {
    async fn classify(&self, text: &str) -> CapabilityResult<RawClassification> {
        let prompt = format!(
            r#"Rate the sentiment of the following email on a scale of 1 to 5 stars
(1 = very negative, 3 = neutral, 5 = very positive).

OUTPUT FORMAT (strict JSON):
{{"label": "N stars", "score": confidence between 0 and 1}}

EMAIL:
{}
"#,
            text
        );
        let request = LlmRequest {
            max_tokens: Some(40),
            temperature: Some(0.0),
            ..LlmRequest::new(prompt)
        };
        let response = self.provider.generate(request).await?;

        let json = extract_json_from_text(&response.content).ok_or_else(|| {
            CapabilityError::Malformed(format!("no JSON in classifier output: {}", response.content))
        })?;
        let parsed: ClassificationJson = serde_json::from_str(&json)
            .map_err(|e| CapabilityError::Malformed(format!("bad classifier JSON {}: {}", json, e)))?;

        Ok(RawClassification {
            label: parsed.label,
            score: parsed.score.unwrap_or(0.5),
        })
    }
}

pub struct LlmTranslator {
    provider: Arc<dyn LlmProvider>,
}

impl LlmTranslator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl Translate for LlmTranslator {
    async fn translate(&self, text: &str, target: Language) -> CapabilityResult<String> {
        let prompt = format!(
            "Translate the following text into {}. Output only the translation.\n\n{}",
            target.display_name(),
            text
        );
        let request = LlmRequest {
            temperature: Some(0.0),
            max_tokens: Some(text.chars().count().max(64) * 2),
            ..LlmRequest::new(prompt)
        };
        let response = self.provider.generate(request).await?;
        let translated = response.content.trim();
        if translated.is_empty() {
            return Err(CapabilityError::Malformed("empty translation".to_string()));
        }
        Ok(translated.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use std::sync::Mutex;

    struct Canned {
        content: String,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl Canned {
        fn new(content: &str) -> Arc<Self> {
            Arc::new(Self {
                content: content.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for Canned {
        async fn generate(&self, request: LlmRequest) -> CapabilityResult<LlmResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(LlmResponse {
                content: self.content.clone(),
                usage: UsageMetadata::default(),
                model: "canned".to_string(),
            })
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn summarizer_passes_budget_and_strips_echo() {
        let provider = Canned::new("Summarize the following...\nSummary: The deadline moved to Friday.");
        let summarizer = LlmSummarizer::new(provider.clone(), Language::English);

        let out = summarizer
            .summarize("The deadline is Friday.", LengthBudget::new(90, 25))
            .await
            .unwrap();
        assert_eq!(out, "The deadline moved to Friday.");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].max_tokens, Some(90));
        assert!(requests[0].prompt.contains("between 25 and 90"));
    }

    #[tokio::test]
    async fn empty_summary_is_malformed() {
        let summarizer = LlmSummarizer::new(Canned::new("Summary:   "), Language::English);
        let err = summarizer.summarize("text", LengthBudget::new(10, 1)).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed(_)));
    }

    #[tokio::test]
    async fn korean_summarizer_uses_korean_prompt() {
        let provider = Canned::new("요약: 금요일 마감입니다.");
        let summarizer = LlmSummarizer::new(provider.clone(), Language::Korean);
        let out = summarizer
            .summarize("마감은 금요일입니다.", LengthBudget::new(72, 20))
            .await
            .unwrap();
        assert_eq!(out, "금요일 마감입니다.");
        assert!(provider.requests.lock().unwrap()[0].prompt.contains("한국어"));
    }

    #[tokio::test]
    async fn classifier_parses_fenced_json() {
        let classifier = LlmClassifier::new(Canned::new(
            "```json\n{\"label\": \"2 stars\", \"score\": 0.71}\n```",
        ));
        let raw = classifier.classify("meh").await.unwrap();
        assert_eq!(raw.label, "2 stars");
        assert_eq!(raw.score, 0.71);
    }

    #[tokio::test]
    async fn classifier_rejects_prose() {
        let classifier = LlmClassifier::new(Canned::new("I think it is positive."));
        assert!(matches!(
            classifier.classify("great").await,
            Err(CapabilityError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn translator_returns_trimmed_text() {
        let provider = Canned::new("  Hello team  \n");
        let translator = LlmTranslator::new(provider.clone());
        let out = translator.translate("안녕하세요 팀", Language::English).await.unwrap();
        assert_eq!(out, "Hello team");
        assert!(provider.requests.lock().unwrap()[0].prompt.contains("into English"));
    }
}
