//! Chunked multi-pass summarization controller.
//!
//! Long input is split into token windows that fit the active model, each window is
//! summarized, the partial summaries are joined and (when still too long or too many)
//! reduced once more, and a final call refines the result. A failed chunk falls back
//! to its first sentence; a first pass with no model output, or a failed refinement,
//! falls back to the first sentences of the whole input.

pub mod budget;

use std::sync::Arc;

use common::SummarizerConfig;
use tracing::{debug, info, warn};

use crate::capability::{Capability, CapabilityError, CapabilityResult, Summarize};
use crate::chunker::{self, Chunk};
use crate::fallback;
use crate::language::{Language, LanguageTag};
use crate::registry::CapabilityRegistry;
use crate::tokenizer::{Tokenizer, TokenizerAdapter};

use budget::{BudgetTable, LengthBudget, Mode, PassBudgets};

/// A summarization model together with the tokenizer that measures its input.
///
/// The tokenizer belongs to this profile only; windows computed with it are never
/// applied to another language's model.
pub struct SummarizerProfile {
    pub language: Language,
    pub model: Arc<dyn Summarize>,
    pub tokenizer: TokenizerAdapter,
    /// Hard cap on the model input regardless of what the tokenizer reports
    pub default_cap: usize,
}

impl SummarizerProfile {
    pub fn new(
        language: Language,
        model: Arc<dyn Summarize>,
        tokenizer: Arc<dyn Tokenizer>,
        default_cap: usize,
    ) -> Self {
        Self {
            language,
            model,
            tokenizer: TokenizerAdapter::new(tokenizer, default_cap),
            default_cap,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub chunk_overlap: usize,
    pub reduce_overlap: usize,
    pub safety_margin: usize,
    pub min_window: usize,
    pub reduce_max_partials: usize,
    pub reduce_max_chars: usize,
    pub fallback_sentences: usize,
}

impl From<&SummarizerConfig> for ControllerSettings {
    fn from(cfg: &SummarizerConfig) -> Self {
        Self {
            chunk_overlap: cfg.chunk_overlap,
            reduce_overlap: cfg.reduce_overlap,
            safety_margin: cfg.safety_margin,
            min_window: cfg.min_window,
            reduce_max_partials: cfg.reduce_max_partials,
            reduce_max_chars: cfg.reduce_max_chars,
            fallback_sentences: cfg.fallback_sentences,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&SummarizerConfig::default())
    }
}

/// Space-joined non-empty partials of one pass, with how many there were and how
/// many came from the model rather than the fallback.
struct ChunkPass {
    text: String,
    partials: usize,
    succeeded: usize,
}

pub struct SummarizationController {
    registry: Arc<CapabilityRegistry>,
    budgets: BudgetTable,
    settings: ControllerSettings,
}

impl SummarizationController {
    pub fn new(registry: Arc<CapabilityRegistry>, budgets: BudgetTable, settings: ControllerSettings) -> Self {
        Self {
            registry,
            budgets,
            settings,
        }
    }

    pub fn from_config(registry: Arc<CapabilityRegistry>, cfg: &SummarizerConfig) -> Self {
        Self::new(registry, BudgetTable::from_config(cfg), ControllerSettings::from(cfg))
    }

    /// Summarize `text`. Never fails: the worst case is the first sentences of the input.
    pub async fn summarize(&self, text: &str, language: LanguageTag, mode: Mode) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }

        let language = language.resolve(text);
        let profile = match self.registry.summarizer(language) {
            Capability::Available(profile) => profile,
            Capability::Unavailable { reason } => {
                warn!(%language, %reason, "no summarizer available, using extractive fallback");
                return self.fallback(text);
            }
        };

        let budgets = self.budgets.get(language, mode);
        let window = self.window_size(&profile);
        debug!(%language, %mode, window, "summarizing");

        match self.reduce(&profile, text, budgets, window).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => {
                warn!(%language, "summarizer returned an empty result, using extractive fallback");
                self.fallback(text)
            }
            Err(e) => {
                warn!(%language, %e, "summarization failed, using extractive fallback");
                self.fallback(text)
            }
        }
    }

    /// Token window for a profile: the smaller of the reported and the per-language
    /// limit, minus the safety margin, never below `min_window`.
    pub fn window_size(&self, profile: &SummarizerProfile) -> usize {
        let margin = self.settings.safety_margin;
        let reported = profile.tokenizer.max_input_length().saturating_sub(margin);
        let cap = profile.default_cap.saturating_sub(margin);
        reported.min(cap).max(self.settings.min_window)
    }

    async fn reduce(
        &self,
        profile: &SummarizerProfile,
        text: &str,
        budgets: PassBudgets,
        window: usize,
    ) -> CapabilityResult<String> {
        let tokens = profile.tokenizer.encode(text)?;
        let chunks = chunker::split(&profile.tokenizer, &tokens, window, self.settings.chunk_overlap)?;

        match chunks.as_slice() {
            [] => Err(CapabilityError::Malformed("input produced no chunks".to_string())),
            [only] => profile.model.summarize(&only.text, budgets.final_pass).await,
            _ => {
                let pass = self.summarize_chunks(profile, &chunks, budgets.first_pass).await;
                info!(
                    tokens = tokens.len(),
                    chunks = chunks.len(),
                    partials = pass.partials,
                    succeeded = pass.succeeded,
                    "first pass complete"
                );
                if pass.succeeded == 0 {
                    return Err(CapabilityError::Failed(
                        "every chunk summarization failed".to_string(),
                    ));
                }

                let mut combined = pass.text;
                if pass.partials > self.settings.reduce_max_partials
                    || combined.chars().count() > self.settings.reduce_max_chars
                {
                    combined = self.re_reduce(profile, combined, budgets.first_pass, window).await;
                }

                if combined.trim().is_empty() {
                    return Err(CapabilityError::Malformed(
                        "every partial summary was empty".to_string(),
                    ));
                }

                let input = self.fit_window(profile, &combined, window);
                profile.model.summarize(&input, budgets.final_pass).await
            }
        }
    }

    /// One pass over `chunks`. A failed chunk contributes its first sentence.
    async fn summarize_chunks(
        &self,
        profile: &SummarizerProfile,
        chunks: &[Chunk],
        budget: LengthBudget,
    ) -> ChunkPass {
        let mut partials = Vec::with_capacity(chunks.len());
        let mut succeeded = 0;
        for (idx, chunk) in chunks.iter().enumerate() {
            let partial = match profile.model.summarize(&chunk.text, budget).await {
                Ok(summary) => {
                    succeeded += 1;
                    summary
                }
                Err(e) => {
                    warn!(chunk = idx, offset = chunk.offset, %e, "chunk summarization failed, extracting one sentence");
                    fallback::extract(&chunk.text, 1)
                }
            };
            let partial = partial.trim();
            if !partial.is_empty() {
                partials.push(partial.to_string());
            }
        }
        ChunkPass {
            partials: partials.len(),
            text: partials.join(" "),
            succeeded,
        }
    }

    /// Second and last reduction level over already-summarized text.
    async fn re_reduce(
        &self,
        profile: &SummarizerProfile,
        combined: String,
        budget: LengthBudget,
        window: usize,
    ) -> String {
        let chunks = match profile.tokenizer.encode(&combined).and_then(|tokens| {
            chunker::split(&profile.tokenizer, &tokens, window, self.settings.reduce_overlap)
        }) {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => return combined,
            Err(e) => {
                warn!(%e, "re-chunking failed, keeping first-pass summary");
                return combined;
            }
        };

        let pass = self.summarize_chunks(profile, &chunks, budget).await;
        info!(chunks = chunks.len(), partials = pass.partials, succeeded = pass.succeeded, "second pass complete");
        if pass.succeeded == 0 || pass.text.trim().is_empty() {
            combined
        } else {
            pass.text
        }
    }

    /// Truncate to the first `window` tokens so the refinement input fits the model.
    fn fit_window(&self, profile: &SummarizerProfile, text: &str, window: usize) -> String {
        match profile.tokenizer.encode(text) {
            Ok(tokens) if tokens.len() > window => {
                debug!(tokens = tokens.len(), window, "truncating refinement input");
                profile
                    .tokenizer
                    .decode(&tokens, 0..window)
                    .unwrap_or_else(|_| text.to_string())
            }
            _ => text.to_string(),
        }
    }

    fn fallback(&self, text: &str) -> String {
        fallback::extract(text, self.settings.fallback_sentences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{HeuristicTokenizer, TokenSequence};
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Test double: counts calls, records inputs, fails the calls whose index is in `failing`.
    struct ScriptedModel {
        calls: AtomicUsize,
        failing: Range<usize>,
        output: String,
        seen: Mutex<Vec<(String, LengthBudget)>>,
    }

    impl ScriptedModel {
        fn new(output: &str) -> Arc<Self> {
            Self::failing(output, 0)
        }

        fn failing(output: &str, fail_first: usize) -> Arc<Self> {
            Self::scripted(output, 0..fail_first)
        }

        /// Succeeds for the first `ok_first` calls, fails afterwards.
        fn failing_from(output: &str, ok_first: usize) -> Arc<Self> {
            Self::scripted(output, ok_first..usize::MAX)
        }

        fn scripted(output: &str, failing: Range<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failing,
                output: output.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Summarize for ScriptedModel {
        async fn summarize(&self, text: &str, budget: LengthBudget) -> CapabilityResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((text.to_string(), budget));
            if self.failing.contains(&n) {
                return Err(CapabilityError::Failed("model crashed".to_string()));
            }
            Ok(self.output.clone())
        }
    }

    struct ReportingTokenizer(Option<usize>);

    impl Tokenizer for ReportingTokenizer {
        fn id(&self) -> &str {
            "heuristic-v1"
        }
        fn encode(&self, text: &str) -> CapabilityResult<TokenSequence> {
            HeuristicTokenizer::new().encode(text)
        }
        fn decode(&self, tokens: &TokenSequence, range: Range<usize>) -> CapabilityResult<String> {
            HeuristicTokenizer::new().decode(tokens, range)
        }
        fn reported_max_length(&self) -> Option<usize> {
            self.0
        }
    }

    fn controller_with(profiles: Vec<SummarizerProfile>) -> SummarizationController {
        let mut registry = CapabilityRegistry::empty();
        for profile in profiles {
            registry = registry.with_summarizer(profile);
        }
        SummarizationController::new(
            Arc::new(registry),
            BudgetTable::default(),
            ControllerSettings::default(),
        )
    }

    fn english(model: Arc<ScriptedModel>) -> SummarizerProfile {
        SummarizerProfile::new(Language::English, model, Arc::new(HeuristicTokenizer::new()), 1024)
    }

    /// `sentences` sentences of six tokens each.
    fn long_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expected_chunks(text: &str, window: usize) -> usize {
        let tok = TokenizerAdapter::new(Arc::new(HeuristicTokenizer::new()), 1024);
        let seq = tok.encode(text).unwrap();
        chunker::split(&tok, &seq, window, 50).unwrap().len()
    }

    #[tokio::test]
    async fn empty_input_returns_empty_without_model_calls() {
        let model = ScriptedModel::new("unused");
        let controller = controller_with(vec![english(model.clone())]);
        assert_eq!(controller.summarize("   \n", LanguageTag::Auto, Mode::Fast).await, "");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn single_chunk_is_one_call_at_final_budget() {
        let model = ScriptedModel::new("Alice asks John to review the report.");
        let controller = controller_with(vec![english(model.clone())]);

        let text = "Hi John, Can you review the attached report by tomorrow? Thanks, Alice";
        let summary = controller.summarize(text, LanguageTag::Auto, Mode::Fast).await;

        assert_eq!(summary, "Alice asks John to review the report.");
        assert_eq!(model.calls(), 1);
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].0, text);
        assert_eq!(
            seen[0].1,
            budget::default_budgets(Language::English, Mode::Fast).final_pass
        );
    }

    #[tokio::test]
    async fn long_input_is_chunked_and_reduced_twice() {
        let model = ScriptedModel::new("Partial summary.");
        let controller = controller_with(vec![english(model.clone())]);

        let text = long_text(834);
        let window = controller.window_size(&english(ScriptedModel::new("")));
        assert_eq!(window, 992);
        let chunks = expected_chunks(&text, window);
        assert!(chunks > 2, "expected several chunks, got {}", chunks);

        let summary = controller.summarize(&text, LanguageTag::Auto, Mode::Fast).await;
        assert_eq!(summary, "Partial summary.");
        // first pass + one re-reduced chunk + final refinement
        assert_eq!(model.calls(), chunks + 2);

        let seen = model.seen.lock().unwrap();
        let budgets = budget::default_budgets(Language::English, Mode::Fast);
        assert!(seen[..chunks + 1].iter().all(|(_, b)| *b == budgets.first_pass));
        assert_eq!(seen.last().unwrap().1, budgets.final_pass);
    }

    #[tokio::test]
    async fn two_short_partials_skip_re_reduction() {
        let model = ScriptedModel::new("Partial summary.");
        let controller = controller_with(vec![english(model.clone())]);

        let text = long_text(250); // 1500 tokens, two windows
        assert_eq!(expected_chunks(&text, 992), 2);

        controller.summarize(&text, LanguageTag::Auto, Mode::Fast).await;
        assert_eq!(model.calls(), 3);
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[2].0, "Partial summary. Partial summary.");
    }

    #[tokio::test]
    async fn long_combined_text_triggers_re_reduction() {
        let verbose = "word ".repeat(320); // 1600 chars per partial
        let model = ScriptedModel::new(verbose.trim());
        let controller = controller_with(vec![english(model.clone())]);

        let text = long_text(250);
        controller.summarize(&text, LanguageTag::Auto, Mode::Fast).await;
        // 2 chunks, re-reduction over one chunk, final refinement
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn failed_chunks_contribute_their_first_sentence() {
        let model = ScriptedModel::failing("Final summary.", 1);
        let controller = controller_with(vec![english(model.clone())]);

        let text = long_text(250);
        let summary = controller.summarize(&text, LanguageTag::Auto, Mode::Fast).await;

        assert_eq!(summary, "Final summary.");
        assert_eq!(model.calls(), 3);
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[2].0, "Sentence number 0 is here. Final summary.");
    }

    #[tokio::test]
    async fn failed_refinement_extracts_from_original() {
        let model = ScriptedModel::failing_from("Partial summary.", 2);
        let controller = controller_with(vec![english(model.clone())]);

        let text = long_text(250);
        let summary = controller.summarize(&text, LanguageTag::Auto, Mode::Fast).await;
        assert_eq!(model.calls(), 3);
        assert_eq!(summary, fallback::extract(&text, 2));
    }

    #[tokio::test]
    async fn failing_model_degrades_to_extract_of_original() {
        let model = ScriptedModel::failing("never", usize::MAX);
        let controller = controller_with(vec![english(model.clone())]);

        let text = "The build failed again. We cannot deploy. Please fix it today.";
        let summary = controller.summarize(text, LanguageTag::Auto, Mode::Llm).await;
        assert_eq!(summary, "The build failed again. We cannot deploy.");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn failing_model_on_long_input_extracts_from_original() {
        let text = long_text(834);
        for mode in [Mode::Fast, Mode::Hybrid] {
            let model = ScriptedModel::failing("never", usize::MAX);
            let controller = controller_with(vec![english(model.clone())]);

            let summary = controller.summarize(&text, LanguageTag::Auto, mode).await;
            assert_eq!(summary, fallback::extract(&text, 2));
            assert_eq!(summary, "Sentence number 0 is here. Sentence number 1 is here.");
            // first pass only: no re-reduction or refinement after a total failure
            assert_eq!(model.calls(), expected_chunks(&text, 992));
        }
    }

    #[tokio::test]
    async fn hostile_inputs_always_yield_a_summary() {
        let bytes: Vec<u8> = (0..20_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let garbage = String::from_utf8_lossy(&bytes).into_owned();
        let unbroken = "x".repeat(100_000);
        let mixed = (0..400)
            .map(|i| format!("회의 {}번 자료를 보내주세요. Please confirm item {} today.", i, i))
            .collect::<Vec<_>>()
            .join(" ");

        for text in [garbage, unbroken, mixed] {
            let model = ScriptedModel::new("Model summary.");
            let ko = ScriptedModel::new("모델 요약.");
            let controller = controller_with(vec![
                english(model.clone()),
                SummarizerProfile::new(Language::Korean, ko.clone(), Arc::new(HeuristicTokenizer::new()), 512),
            ]);
            for mode in [Mode::Fast, Mode::Llm] {
                let summary = controller.summarize(&text, LanguageTag::Auto, mode).await;
                assert!(!summary.trim().is_empty());
            }
            assert!(model.calls() + ko.calls() > 0);

            let failing = ScriptedModel::failing("never", usize::MAX);
            let controller = controller_with(vec![english(failing)]);
            let summary = controller
                .summarize(&text, LanguageTag::Explicit(Language::English), Mode::Hybrid)
                .await;
            assert_eq!(summary, fallback::extract(text.trim(), 2));
        }
    }

    #[tokio::test]
    async fn missing_language_model_uses_fallback() {
        let model = ScriptedModel::new("English summary.");
        let controller = controller_with(vec![english(model.clone())]);

        let text = "회의는 금요일입니다. 자료를 화요일까지 보내주세요. 감사합니다.";
        let summary = controller.summarize(text, LanguageTag::Auto, Mode::Fast).await;
        assert_eq!(summary, "회의는 금요일입니다. 자료를 화요일까지 보내주세요.");
        assert_eq!(model.calls(), 0);

        // explicit override routes the same text to the English model
        let summary = controller
            .summarize(text, LanguageTag::Explicit(Language::English), Mode::Fast)
            .await;
        assert_eq!(summary, "English summary.");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn korean_text_uses_korean_profile() {
        let en = ScriptedModel::new("english");
        let ko = ScriptedModel::new("한국어 요약");
        let controller = controller_with(vec![
            english(en.clone()),
            SummarizerProfile::new(Language::Korean, ko.clone(), Arc::new(HeuristicTokenizer::new()), 512),
        ]);

        let summary = controller
            .summarize("내일 회의 자료를 보내주세요.", LanguageTag::Auto, Mode::Fast)
            .await;
        assert_eq!(summary, "한국어 요약");
        assert_eq!(en.calls(), 0);
        assert_eq!(ko.calls(), 1);
        assert_eq!(
            ko.seen.lock().unwrap()[0].1,
            budget::default_budgets(Language::Korean, Mode::Fast).final_pass
        );
    }

    #[tokio::test]
    async fn empty_model_output_falls_back() {
        let model = ScriptedModel::new("   ");
        let controller = controller_with(vec![english(model)]);
        let summary = controller
            .summarize("One. Two. Three.", LanguageTag::Auto, Mode::Fast)
            .await;
        assert_eq!(summary, "One. Two.");
    }

    #[test]
    fn window_size_respects_margin_cap_and_floor() {
        let controller = controller_with(Vec::new());
        let profile = |reported, cap| {
            SummarizerProfile::new(
                Language::English,
                ScriptedModel::new(""),
                Arc::new(ReportingTokenizer(reported)),
                cap,
            )
        };
        assert_eq!(controller.window_size(&profile(None, 1024)), 992);
        assert_eq!(controller.window_size(&profile(Some(usize::MAX), 1024)), 992);
        assert_eq!(controller.window_size(&profile(Some(4096), 1024)), 992);
        assert_eq!(controller.window_size(&profile(Some(300), 1024)), 268);
        assert_eq!(controller.window_size(&profile(Some(100), 1024)), 128);
        assert_eq!(controller.window_size(&profile(None, 512)), 480);
    }
}
