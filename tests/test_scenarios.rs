//! End-to-end behaviour through the public API: routing, search decisions,
//! rolling memory and the no-web fallback.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lateral::config::SearchConfig;
use lateral::llm::providers::dummy::DummyProvider;
use lateral::llm::{LlmProvider, ProviderEntry, ProviderRegistry};
use lateral::subsystems::agents::ConversationOrchestrator;
use lateral::subsystems::memory::stores::tmp::TmpStore;
use lateral::subsystems::memory::{MemoryManager, MemorySettings, Summarizer, Turn, UpdateOutcome};
use lateral::subsystems::routing::{
    ProviderProfile, RecommendationEngine, RecommendationSource, ScoringWeights,
};
use lateral::subsystems::search::{SearchDecider, SearchTag, WebSearch};

fn no_prompts() -> PathBuf {
    PathBuf::from("/nonexistent")
}

fn registry(provider: DummyProvider) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(
        "dummy",
        vec![ProviderEntry::new("dummy", LlmProvider::Dummy(provider))],
    ))
}

fn profile(id: &str, tags: &[&str], strengths: &[&str]) -> ProviderProfile {
    ProviderProfile {
        id: id.into(),
        tags: tags.iter().map(|s| s.to_string()).collect(),
        specialties: Vec::new(),
        strengths: strengths.iter().map(|s| s.to_string()).collect(),
        ideal_use_cases: Vec::new(),
    }
}

fn search_config(endpoint: String, api_key: Option<&str>) -> SearchConfig {
    SearchConfig {
        endpoint,
        num_results: 6,
        hl: "pt-br".into(),
        gl: "br".into(),
        timeout_seconds: 8,
        api_key: api_key.map(str::to_string),
    }
}

#[test]
fn programming_prompt_routes_to_code_profile() {
    let engine = RecommendationEngine::new(
        vec![
            profile("openai", &["email", "texto"], &["Conversas naturais"]),
            profile("claude", &["relatorio", "analise"], &["Estrutura e rigor"]),
            profile("deepseek", &["codigo", "programar"], &["Precisão técnica em programação"]),
            profile("gemini", &["organizar", "planejar"], &["Organização"]),
        ],
        ScoringWeights::default(),
    );

    let rec = engine.recommend("me ajude a programar uma função em javascript");
    assert_eq!(rec.provider_id, "deepseek");
    assert_eq!(rec.source, RecommendationSource::Catalog);
}

#[test]
fn bundled_catalog_routes_programming_to_deepseek() {
    let engine = RecommendationEngine::from_file(
        &PathBuf::from("config/profiles.toml"),
        ScoringWeights::default(),
    )
    .unwrap();
    assert_eq!(engine.profiles().len(), 4);

    let rec = engine.recommend("me ajude a programar uma função em javascript");
    assert_eq!(rec.provider_id, "deepseek");
}

#[tokio::test]
async fn untagged_reply_defaults_to_maybe_search() {
    let provider = DummyProvider::new().with_reply("User question", "random text without any tag");
    let decider = SearchDecider::new(registry(provider), no_prompts());
    let prompt = "quais foram os resultados do campeonato brasileiro ontem à noite";

    let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
    let decision = decider.decide(prompt, prompt, "dummy", today).await;

    assert_eq!(decision.tag, SearchTag::MaybeSearch);
    assert_eq!(
        decision.query.as_deref(),
        Some("quais foram os resultados do campeonato")
    );
}

#[tokio::test]
async fn ten_turns_fold_the_oldest_pair_into_the_summary() {
    let provider = DummyProvider::new().with_reply("CONVERSATION:", "they introduced themselves");
    let registry = registry(provider.clone());
    let memory = MemoryManager::new(
        Arc::new(TmpStore::new()),
        Summarizer::new(registry, "dummy", no_prompts()),
        MemorySettings::default(),
    );

    let turns: Vec<Turn> = (0..10)
        .map(|i| if i % 2 == 0 { Turn::user(format!("question {i}")) } else { Turn::assistant(format!("answer {i}")) })
        .collect();

    let outcome = memory.update("conv-x", &turns).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Updated { summarized: true });

    let snapshot = memory.snapshot("conv-x").await.unwrap().unwrap();
    assert_eq!(snapshot.recent_turns.len(), 8);
    assert_eq!(snapshot.recent_turns[0].text, "question 2");
    assert_eq!(snapshot.old_summary.as_deref(), Some("they introduced themselves"));
    assert_eq!(snapshot.total_turn_count, 10);

    // Only turns 0 and 1 reached the summarizer.
    let call = provider.calls().pop().unwrap();
    assert!(call.content.contains("User: question 0"));
    assert!(call.content.contains("AI: answer 1"));
    assert!(!call.content.contains("question 2"));
}

#[tokio::test]
async fn failed_search_still_answers_without_web() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let provider = DummyProvider::new()
        .with_reply("User question", "#NEEDS_SEARCH\nSEARCH_QUERY: dollar rate today")
        .with_reply("No web access", "Around 5.70 at last check.");
    let registry = registry(provider.clone());
    let store = Arc::new(TmpStore::new());
    let memory = Arc::new(MemoryManager::new(
        store.clone(),
        Summarizer::new(registry.clone(), "dummy", no_prompts()),
        MemorySettings::default(),
    ));
    let search = WebSearch::new(&search_config(format!("{}/search", server.uri()), Some("k"))).unwrap();
    let orchestrator = ConversationOrchestrator::new(
        registry.clone(),
        memory,
        store,
        SearchDecider::new(registry, no_prompts()),
        search,
        Arc::new(RecommendationEngine::new(Vec::new(), ScoringWeights::default())),
    );

    let out = orchestrator
        .handle_user_message("conv-d", "user-1", "what is the dollar rate today?", None)
        .await
        .unwrap();

    assert_eq!(out.answer, "Around 5.70 at last check.");
    assert_eq!(out.decision_tag, SearchTag::NeedsSearch);
    assert!(!out.search_used);
    assert!(out.sources.is_empty());

    let last = provider.calls().pop().unwrap();
    assert!(last.content.starts_with("No web access"));
    assert!(last.content.ends_with("what is the dollar rate today?"));
    assert_eq!(orchestrator.turns("conv-d").await.unwrap().len(), 2);
}
