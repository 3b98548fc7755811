//! Per-turn orchestration.
//!
//! One user turn moves through `Idle → Deciding → (Searching) → Generating →
//! Done`:
//!
//! 1. Read the conversation's memory context.
//! 2. Ask the selected provider whether the turn needs a web search.
//! 3. Search when asked to, degrading to a "no web access" prompt when the
//!    search yields nothing.
//! 4. Generate the answer with the selected provider.
//! 5. Append both turns to the transcript and fold it into memory.
//!
//! Only step 4 can fail the turn. Memory, search and decision failures are
//! logged and absorbed. A failed or cancelled generation leaves transcript
//! and memory untouched.
//!
//! Provider advice for the first message of a conversation is a separate
//! call ([`ConversationOrchestrator::advise`]); the caller decides whether to
//! switch.

use std::fmt;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::llm::{ProviderError, ProviderRegistry};
use crate::subsystems::memory::store::validate_conversation_id;
use crate::subsystems::memory::{KeyedLocks, MemoryManager, TranscriptStore, Turn};
use crate::subsystems::routing::{
    RecommendationEngine, RecommendationSource, TaskType, detect_task_type, suggestion,
};
use crate::subsystems::search::{SearchDecider, SearchTag, WebSearch, format_search_context};

/// Appended to answers cut off by the provider's output token limit.
pub const TRUNCATION_NOTICE: &str = "\n\n⚠️ Response reached the token limit";

const NO_WEB_INSTRUCTION: &str = "No web access. Answer from your most up-to-date knowledge:";
const ORIGINAL_QUESTION_LABEL: &str = "**ORIGINAL QUESTION:**";
const SOURCES_IN_OUTCOME: usize = 3;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyPrompt,
    #[error("invalid conversation id: {0}")]
    InvalidConversation(String),
    #[error("provider not available: {0}")]
    ProviderUnavailable(String),
    #[error("provider failed: {0}")]
    Provider(String),
    #[error("generation cancelled")]
    Cancelled,
}

impl ChatError {
    /// Text safe to show the end user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyPrompt => "Please type a message.".to_string(),
            Self::InvalidConversation(_) => "This conversation could not be found.".to_string(),
            Self::ProviderUnavailable(id) => {
                format!("The model '{id}' is not configured. Check its API key or pick another model.")
            }
            Self::Provider(_) => {
                "The AI provider failed to answer. Please try again in a moment.".to_string()
            }
            Self::Cancelled => "Generation cancelled.".to_string(),
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnknownProvider(id) | ProviderError::Unavailable(id) => {
                Self::ProviderUnavailable(id)
            }
            ProviderError::Request(msg) => Self::Provider(msg),
        }
    }
}

// ── Turn types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Deciding,
    Searching,
    Generating,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Deciding => "deciding",
            Self::Searching => "searching",
            Self::Generating => "generating",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLink {
    pub title: String,
    pub link: String,
}

/// Result of a successful turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub provider_used: String,
    pub decision_tag: SearchTag,
    pub search_used: bool,
    /// Present only when search results were injected into the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    pub sources: Vec<SourceLink>,
    pub memory_context_used: bool,
    pub truncated: bool,
    pub task_type: TaskType,
    pub suggested_provider: String,
}

/// First-turn provider recommendation. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAdvice {
    pub current: String,
    pub recommended: String,
    pub reason: String,
    pub source: RecommendationSource,
    /// `recommended == current`; nothing to ask the user.
    pub already_best: bool,
    pub recommended_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    Continue,
    Switch,
}

impl ProviderAdvice {
    /// Provider to use after the user answered the advice.
    pub fn resolve(&self, choice: ProviderChoice) -> &str {
        match choice {
            ProviderChoice::Continue => &self.current,
            ProviderChoice::Switch => &self.recommended,
        }
    }
}

/// New conversation id. UUIDv7 ids sort by creation time.
pub fn new_conversation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct ConversationOrchestrator {
    registry: Arc<ProviderRegistry>,
    memory: Arc<MemoryManager>,
    transcripts: Arc<dyn TranscriptStore>,
    decider: SearchDecider,
    search: WebSearch,
    engine: Arc<RecommendationEngine>,
    min_prompt_chars: usize,
    /// Serializes whole turns per conversation.
    turn_locks: KeyedLocks,
}

impl ConversationOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        memory: Arc<MemoryManager>,
        transcripts: Arc<dyn TranscriptStore>,
        decider: SearchDecider,
        search: WebSearch,
        engine: Arc<RecommendationEngine>,
    ) -> Self {
        Self {
            registry,
            memory,
            transcripts,
            decider,
            search,
            engine,
            min_prompt_chars: 10,
            turn_locks: KeyedLocks::new(),
        }
    }

    /// Messages of at most this many characters get no provider advice.
    pub fn with_min_prompt_chars(mut self, chars: usize) -> Self {
        self.min_prompt_chars = chars;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn engine(&self) -> &Arc<RecommendationEngine> {
        &self.engine
    }

    pub fn search(&self) -> &WebSearch {
        &self.search
    }

    async fn transcript<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&dyn TranscriptStore) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.transcripts);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| AppError::Memory(format!("transcript task failed: {e}")))?
    }

    /// Recorded turns of a conversation, oldest first.
    pub async fn turns(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError> {
        let id = conversation_id.to_string();
        self.transcript(move |s| s.read_all(&id)).await
    }

    /// Recommend a provider for the first message of a conversation.
    ///
    /// `None` when the conversation already has turns or the message is too
    /// short to judge.
    pub async fn advise(&self, conversation_id: &str, text: &str, current: &str) -> Option<ProviderAdvice> {
        let text = text.trim();
        if text.chars().count() <= self.min_prompt_chars {
            return None;
        }
        match self.turns(conversation_id).await {
            Ok(turns) if turns.is_empty() => {}
            Ok(_) => return None,
            Err(e) => {
                warn!(conversation_id, error = %e, "cannot read transcript; no advice");
                return None;
            }
        }

        let rec = self.engine.recommend(text);
        let advice = ProviderAdvice {
            already_best: rec.provider_id == current,
            recommended_available: self.registry.is_available(&rec.provider_id),
            current: current.to_string(),
            recommended: rec.provider_id,
            reason: rec.reason,
            source: rec.source,
        };
        info!(
            conversation_id,
            current = %advice.current,
            recommended = %advice.recommended,
            already_best = advice.already_best,
            "provider advice"
        );
        Some(advice)
    }

    /// Handle one user message. `selected_provider` of `None` uses the
    /// registry default.
    pub async fn handle_user_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        text: &str,
        selected_provider: Option<&str>,
    ) -> Result<TurnOutcome, ChatError> {
        self.handle_user_message_cancellable(
            conversation_id,
            user_id,
            text,
            selected_provider,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`handle_user_message`](Self::handle_user_message), but stops with
    /// [`ChatError::Cancelled`] as soon as `cancel` fires. Nothing is recorded
    /// for a cancelled turn.
    pub async fn handle_user_message_cancellable(
        &self,
        conversation_id: &str,
        user_id: &str,
        text: &str,
        selected_provider: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        validate_conversation_id(conversation_id)
            .map_err(|_| ChatError::InvalidConversation(conversation_id.to_string()))?;

        let (entry, _) = self.registry.resolve(selected_provider)?;
        let provider = entry.id.clone();
        let task_type = detect_task_type(text);
        let suggested = suggestion(task_type);
        info!(conversation_id, user_id, provider = %provider, task = %task_type, "user turn");

        let _turn = self.turn_locks.lock(conversation_id).await;
        self.memory.mark_active(conversation_id);
        let mut state = TurnState::Idle;

        // ── 1. Memory context ───────────────────────────────────────────
        let context = match self.memory.context(conversation_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(conversation_id, error = %e, "memory context unavailable");
                None
            }
        };
        let ctx = context.as_deref().map(str::trim_end);

        // ── 2. Search decision ──────────────────────────────────────────
        transition(conversation_id, &mut state, TurnState::Deciding);
        let prompt_for_decision = prefix(ctx, "\n", text);
        let decision = cancellable(
            cancel,
            self.decider.decide(&prompt_for_decision, text, &provider, today()),
        )
        .await?;

        // ── 3. Optional web search ──────────────────────────────────────
        let mut search_query = None;
        let mut sources = Vec::new();
        let final_prompt = match decision.query.as_deref() {
            Some(query) if decision.tag.wants_search() => {
                transition(conversation_id, &mut state, TurnState::Searching);
                let results = cancellable(cancel, self.search.query(query)).await?;
                let block = results.as_ref().and_then(|r| {
                    format_search_context(r, text, today(), self.search.num_results())
                });
                match (results, block) {
                    (Some(results), Some(block)) => {
                        search_query = Some(query.to_string());
                        sources = results
                            .organic
                            .iter()
                            .take(SOURCES_IN_OUTCOME)
                            .map(|h| SourceLink { title: h.title.clone(), link: h.link.clone() })
                            .collect();
                        prefix(ctx, "\n\n", &format!("{block}\n\n{ORIGINAL_QUESTION_LABEL} {text}"))
                    }
                    _ => {
                        warn!(conversation_id, query, "search gave nothing; answering without web");
                        prefix(ctx, "\n\n", &format!("{NO_WEB_INSTRUCTION}\n\n{text}"))
                    }
                }
            }
            _ => prefix(ctx, "\n\n", text),
        };
        let search_used = search_query.is_some();

        // ── 4. Generation ───────────────────────────────────────────────
        transition(conversation_id, &mut state, TurnState::Generating);
        let reply = match cancellable(cancel, self.registry.generate(&provider, &final_prompt)).await? {
            Ok(reply) => reply,
            Err(e) => {
                error!(conversation_id, provider = %provider, error = %e, "generation failed");
                return Err(e.into());
            }
        };
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        let mut answer = reply.text.trim().to_string();
        if reply.truncated {
            answer.push_str(TRUNCATION_NOTICE);
        }

        // ── 5. Transcript + memory ──────────────────────────────────────
        self.record(conversation_id, text, &answer).await;
        transition(conversation_id, &mut state, TurnState::Done);

        info!(
            conversation_id,
            provider = %provider,
            tag = %decision.tag,
            search_used,
            truncated = reply.truncated,
            "turn complete"
        );
        Ok(TurnOutcome {
            answer,
            provider_used: provider,
            decision_tag: decision.tag,
            search_used,
            search_query,
            sources,
            memory_context_used: context.is_some(),
            truncated: reply.truncated,
            task_type,
            suggested_provider: suggested.provider_id.to_string(),
        })
    }

    /// Append the exchange and fold the transcript into memory. Failures are
    /// logged; the answer is still returned.
    async fn record(&self, conversation_id: &str, question: &str, answer: &str) {
        let id = conversation_id.to_string();
        let exchange = [Turn::user(question), Turn::assistant(answer)];
        let turns = self
            .transcript(move |s| {
                for turn in &exchange {
                    s.append(&id, turn)?;
                }
                s.read_all(&id)
            })
            .await;

        match turns {
            Ok(turns) => {
                if let Err(e) = self.memory.update(conversation_id, &turns).await {
                    warn!(conversation_id, error = %e, "memory update failed");
                }
            }
            Err(e) => warn!(conversation_id, error = %e, "transcript append failed; memory not updated"),
        }
    }
}

fn transition(conversation_id: &str, state: &mut TurnState, next: TurnState) {
    debug!(conversation_id, from = %state, to = %next, "turn state");
    *state = next;
}

/// `{ctx}{sep}{text}`, or just `text` without context.
fn prefix(ctx: Option<&str>, sep: &str, text: &str) -> String {
    match ctx {
        Some(ctx) => format!("{ctx}{sep}{text}"),
        None => text.to_string(),
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, ChatError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled),
        out = fut => Ok(out),
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::config::SearchConfig;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmProvider, ProviderEntry};
    use crate::subsystems::memory::stores::tmp::TmpStore;
    use crate::subsystems::memory::{CONTEXT_HEADER, MemorySettings, NEW_MESSAGE_MARKER, Summarizer};
    use crate::subsystems::routing::{ProviderProfile, ScoringWeights};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serper(hits: usize, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        let organic: Vec<_> = (1..=hits)
            .map(|n| json!({"title": format!("Hit {n}"), "snippet": format!("Snippet {n}"), "link": format!("https://example.com/{n}")}))
            .collect();
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "organic": organic })))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    struct Fixture {
        orchestrator: ConversationOrchestrator,
        store: Arc<TmpStore>,
    }

    fn web_search(endpoint: String, api_key: Option<&str>, timeout_seconds: u64) -> WebSearch {
        WebSearch::new(&SearchConfig {
            endpoint,
            num_results: 6,
            hl: "en".into(),
            gl: "us".into(),
            timeout_seconds,
            api_key: api_key.map(str::to_string),
        })
        .unwrap()
    }

    fn no_search() -> WebSearch {
        web_search("http://127.0.0.1:9/search".into(), None, 8)
    }

    fn fixture(entries: Vec<ProviderEntry>) -> Fixture {
        fixture_with(entries, no_search(), MemorySettings::default())
    }

    fn fixture_with(entries: Vec<ProviderEntry>, search: WebSearch, settings: MemorySettings) -> Fixture {
        let registry = Arc::new(ProviderRegistry::new("dummy", entries));
        let store = Arc::new(TmpStore::new());
        let prompts = PathBuf::from("/nonexistent");
        let memory = Arc::new(MemoryManager::new(
            store.clone(),
            Summarizer::new(registry.clone(), "dummy", prompts.clone()),
            settings,
        ));
        let engine = Arc::new(RecommendationEngine::new(
            vec![ProviderProfile {
                id: "deepseek".into(),
                tags: vec!["codigo".into(), "programar".into()],
                specialties: Vec::new(),
                strengths: vec!["Technical precision".into()],
                ideal_use_cases: Vec::new(),
            }],
            ScoringWeights::default(),
        ));
        let orchestrator = ConversationOrchestrator::new(
            registry.clone(),
            memory,
            store.clone(),
            SearchDecider::new(registry, prompts),
            search,
            engine,
        );
        Fixture { orchestrator, store }
    }

    fn dummy(p: DummyProvider) -> Vec<ProviderEntry> {
        vec![ProviderEntry::new("dummy", LlmProvider::Dummy(p))]
    }

    #[tokio::test]
    async fn no_search_turn_answers_directly() {
        let p = DummyProvider::new()
            .with_reply("User question", "#NO_SEARCH\nReason: general knowledge")
            .with_reply("capital", "Paris.");
        let f = fixture(dummy(p.clone()));

        let out = f.orchestrator.handle_user_message("c1", "u1", "What is the capital of France?", None).await.unwrap();
        assert_eq!(out.answer, "Paris.");
        assert_eq!(out.decision_tag, SearchTag::NoSearch);
        assert!(!out.search_used);
        assert!(out.search_query.is_none());
        assert!(!out.memory_context_used);

        let calls = p.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].content, "What is the capital of France?");
        assert_eq!(f.store.read_all("c1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_search_uses_no_web_prompt() {
        let p = DummyProvider::new()
            .with_reply("User question", "#NEEDS_SEARCH\nSEARCH_QUERY: euro rate today")
            .with_reply(NO_WEB_INSTRUCTION, "About 1.08.");
        let f = fixture(dummy(p.clone()));

        let out = f.orchestrator.handle_user_message("c1", "u1", "euro to dollar rate?", None).await.unwrap();
        assert_eq!(out.answer, "About 1.08.");
        assert_eq!(out.decision_tag, SearchTag::NeedsSearch);
        assert!(!out.search_used);
        assert!(out.search_query.is_none());
        assert_eq!(p.calls()[1].content, format!("{NO_WEB_INSTRUCTION}\n\neuro to dollar rate?"));
    }

    #[tokio::test]
    async fn search_results_shape_the_final_prompt() {
        let organic: Vec<_> = (1..=5)
            .map(|n| json!({"title": format!("Rate {n}"), "snippet": format!("1.0{n} USD"), "link": format!("https://fx.example/{n}")}))
            .collect();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"q": "euro rate October 2026"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "organic": organic })))
            .expect(1)
            .mount(&server)
            .await;

        let p = DummyProvider::new()
            .with_reply("User question", "#NEEDS_SEARCH\nSEARCH_QUERY: euro rate October 2026")
            .with_reply("SEARCH CONTEXT", "About 1.08, per fx.example.");
        let search = web_search(format!("{}/search", server.uri()), Some("k"), 8);
        let f = fixture_with(dummy(p.clone()), search, MemorySettings::default());

        let out = f.orchestrator.handle_user_message("c1", "u1", "euro to dollar rate?", None).await.unwrap();
        assert_eq!(out.answer, "About 1.08, per fx.example.");
        assert_eq!(out.decision_tag, SearchTag::NeedsSearch);
        assert!(out.search_used);
        assert_eq!(out.search_query.as_deref(), Some("euro rate October 2026"));
        assert_eq!(out.sources.len(), SOURCES_IN_OUTCOME);
        assert_eq!(
            out.sources[0],
            SourceLink { title: "Rate 1".into(), link: "https://fx.example/1".into() }
        );

        let prompt = p.calls().pop().unwrap().content;
        assert!(prompt.starts_with("**SEARCH CONTEXT** - "), "{prompt}");
        assert!(prompt.contains("**Relevant information for: \"euro to dollar rate?\"**"));
        assert!(prompt.contains("1. **Rate 1**\n   1.01 USD\n   *Source: https://fx.example/1*"));
        assert!(prompt.contains("5. **Rate 5**"));
        assert!(prompt.ends_with(&format!("Cite sources when relevant.\n\n{ORIGINAL_QUESTION_LABEL} euro to dollar rate?")));
        assert_eq!(f.store.read_all("c1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_block_follows_memory_context() {
        let server = serper(2, 2).await;
        let p = DummyProvider::new()
            .with_reply("User question", "#NEEDS_SEARCH\nSEARCH_QUERY: lisbon news October 2026")
            .with_reply("CONVERSATION:", "they asked about Lisbon")
            .with_reply("SEARCH CONTEXT", "Here is the news.");
        let search = web_search(format!("{}/search", server.uri()), Some("k"), 8);
        let f = fixture_with(dummy(p.clone()), search, MemorySettings::default());

        f.orchestrator.handle_user_message("c1", "u1", "lisbon news", None).await.unwrap();
        let out = f.orchestrator.handle_user_message("c1", "u1", "and tomorrow?", None).await.unwrap();
        assert!(out.search_used);
        assert!(out.memory_context_used);
        assert_eq!(out.sources.len(), 2);

        let prompt = p.calls().pop().unwrap().content;
        assert!(prompt.starts_with(CONTEXT_HEADER));
        assert!(prompt.contains(&format!("{NEW_MESSAGE_MARKER}\n\n**SEARCH CONTEXT** - ")));
        assert!(prompt.ends_with(&format!("{ORIGINAL_QUESTION_LABEL} and tomorrow?")));
    }

    #[tokio::test]
    async fn maybe_search_takes_the_search_path() {
        let server = serper(1, 1).await;
        let p = DummyProvider::new()
            .with_reply("User question", "#MAYBE_SEARCH\nSEARCH_QUERY: rust release October 2026")
            .with_reply("SEARCH CONTEXT", "Rust 1.91 is out.");
        let search = web_search(format!("{}/search", server.uri()), Some("k"), 8);
        let f = fixture_with(dummy(p), search, MemorySettings::default());

        let out = f.orchestrator.handle_user_message("c1", "u1", "latest rust version?", None).await.unwrap();
        assert_eq!(out.decision_tag, SearchTag::MaybeSearch);
        assert!(out.search_used);
        assert_eq!(out.search_query.as_deref(), Some("rust release October 2026"));
        assert_eq!(out.answer, "Rust 1.91 is out.");
    }

    #[tokio::test]
    async fn slow_search_times_out_to_no_web_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"organic": [{"title": "late", "snippet": "", "link": "https://x"}]}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let p = DummyProvider::new()
            .with_reply("User question", "#NEEDS_SEARCH\nSEARCH_QUERY: euro rate today")
            .with_reply(NO_WEB_INSTRUCTION, "About 1.08.");
        let search = web_search(format!("{}/search", server.uri()), Some("k"), 1);
        let f = fixture_with(dummy(p.clone()), search, MemorySettings::default());

        let out = f.orchestrator.handle_user_message("c1", "u1", "euro to dollar rate?", None).await.unwrap();
        assert_eq!(out.answer, "About 1.08.");
        assert!(!out.search_used);
        assert!(out.sources.is_empty());
        assert_eq!(p.calls()[1].content, format!("{NO_WEB_INSTRUCTION}\n\neuro to dollar rate?"));
    }

    #[tokio::test]
    async fn per_conversation_state_is_bounded_after_eviction() {
        let p = DummyProvider::new().with_reply("User question", "#NO_SEARCH");
        let settings = MemorySettings { max_conversations: 2, ..Default::default() };
        let f = fixture_with(dummy(p), no_search(), settings);

        for i in 0..50 {
            f.orchestrator.handle_user_message(&format!("c{i:03}"), "u1", "hello there", None).await.unwrap();
        }
        assert!(f.orchestrator.turn_locks.is_empty());

        let evicted = f.orchestrator.memory().evict_stale(Some("c049")).await.unwrap();
        assert_eq!(evicted.len(), 48);
        assert!(f.orchestrator.turn_locks.len() <= 2);
        assert!(f.store.read_all("c000").unwrap().is_empty());
        assert_eq!(f.store.read_all("c049").unwrap().len(), 2);
        assert_eq!(f.store.read_all("c048").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_leaves_memory_untouched() {
        let p = DummyProvider::new()
            .with_reply("User question", "#NO_SEARCH")
            .with_failure("boom", "HTTP 500");
        let f = fixture(dummy(p));

        let err = f.orchestrator.handle_user_message("c1", "u1", "boom", None).await.unwrap_err();
        assert_eq!(err, ChatError::Provider("HTTP 500".into()));
        assert!(!err.user_message().contains("500"));
        assert!(f.store.read_all("c1").unwrap().is_empty());
        assert!(f.orchestrator.memory().snapshot("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unavailable_provider_is_typed() {
        let mut entries = dummy(DummyProvider::new());
        entries.push(ProviderEntry::unavailable("claude"));
        let f = fixture(entries);

        let err = f.orchestrator.handle_user_message("c1", "u1", "hi", Some("claude")).await.unwrap_err();
        assert_eq!(err, ChatError::ProviderUnavailable("claude".into()));
        let err = f.orchestrator.handle_user_message("c1", "u1", "hi", Some("ghost")).await.unwrap_err();
        assert_eq!(err, ChatError::ProviderUnavailable("ghost".into()));
    }

    #[tokio::test]
    async fn rejects_empty_message_and_bad_id() {
        let f = fixture(dummy(DummyProvider::new()));
        assert_eq!(
            f.orchestrator.handle_user_message("c1", "u1", "  ", None).await.unwrap_err(),
            ChatError::EmptyPrompt
        );
        assert!(matches!(
            f.orchestrator.handle_user_message("../x", "u1", "hi", None).await.unwrap_err(),
            ChatError::InvalidConversation(_)
        ));
    }

    #[tokio::test]
    async fn second_turn_carries_memory_context() {
        let p = DummyProvider::new()
            .with_reply("User question", "#NO_SEARCH")
            .with_reply("CONVERSATION:", "they greeted")
            .with_reply("again", "Hello again.");
        let f = fixture(dummy(p.clone()));

        f.orchestrator.handle_user_message("c1", "u1", "hello", None).await.unwrap();
        let out = f.orchestrator.handle_user_message("c1", "u1", "hello again", None).await.unwrap();
        assert!(out.memory_context_used);

        let last = p.calls().pop().unwrap();
        assert!(last.content.contains("they greeted"));
        assert!(last.content.ends_with(&format!("{NEW_MESSAGE_MARKER}\n\nhello again")));
        assert_eq!(f.store.read_all("c1").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn truncated_answer_gets_notice() {
        let p = DummyProvider::new()
            .with_reply("User question", "#NO_SEARCH")
            .with_truncated_reply("essay", "Once upon");
        let f = fixture(dummy(p));

        let out = f.orchestrator.handle_user_message("c1", "u1", "write an essay", None).await.unwrap();
        assert!(out.truncated);
        assert_eq!(out.answer, format!("Once upon{TRUNCATION_NOTICE}"));
    }

    #[tokio::test]
    async fn cancelled_generation_records_nothing() {
        let p = DummyProvider::new().with_reply("User question", "#NO_SEARCH").with_delay(Duration::from_millis(200));
        let f = fixture(dummy(p));
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = f
            .orchestrator
            .handle_user_message_cancellable("c1", "u1", "slow question", None, &token)
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::Cancelled);
        assert!(f.store.read_all("c1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn advice_only_on_first_substantial_message() {
        let f = fixture(dummy(DummyProvider::new().with_reply("User question", "#NO_SEARCH")));
        let o = &f.orchestrator;

        assert!(o.advise("c1", "short", "openai").await.is_none());

        let advice = o.advise("c1", "me ajude a programar uma função", "openai").await.unwrap();
        assert_eq!(advice.recommended, "deepseek");
        assert!(!advice.already_best);
        assert!(!advice.recommended_available);
        assert_eq!(advice.resolve(ProviderChoice::Continue), "openai");
        assert_eq!(advice.resolve(ProviderChoice::Switch), "deepseek");

        o.handle_user_message("c1", "u1", "hello there", None).await.unwrap();
        assert!(o.advise("c1", "me ajude a programar uma função", "openai").await.is_none());
    }

    #[test]
    fn provider_errors_map_to_chat_errors() {
        assert_eq!(
            ChatError::from(ProviderError::Unavailable("gemini".into())),
            ChatError::ProviderUnavailable("gemini".into())
        );
        assert_eq!(ChatError::from(ProviderError::Request("x".into())), ChatError::Provider("x".into()));
    }

    #[test]
    fn conversation_ids_sort_by_creation() {
        let a = new_conversation_id();
        std::thread::sleep(Duration::from_millis(2));
        let b = new_conversation_id();
        assert!(a < b);
        validate_conversation_id(&a).unwrap();
    }
}
