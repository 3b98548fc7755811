//! Turn-list summarization through an LLM provider.
//!
//! Failures never propagate: `summarize` returns `None` and the caller omits
//! the summary segment.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::ProviderRegistry;
use crate::subsystems::agents::prompt::PromptBuilder;

use super::types::Turn;

const TEMPLATE_FILE: &str = "summarize.txt";

const FALLBACK_TEMPLATE: &str = "\
You summarize conversations intelligently and concisely.

TASK: Summarize the conversation below, keeping the most important information and the essential context.
LIMIT: {{limit}} words maximum
STYLE: concise, clear and informative

INSTRUCTIONS:
- Keep the main points discussed
- Preserve context that matters for future interactions
- Use clear, objective language
- Focus on what is relevant to continue the conversation

CONVERSATION:
{{conversation}}

SUMMARY:";

#[derive(Clone)]
pub struct Summarizer {
    registry: Arc<ProviderRegistry>,
    /// Providers tried in order until one answers.
    providers: Vec<String>,
    prompts_dir: PathBuf,
}

impl Summarizer {
    /// `preferred` is tried first, then the registry default.
    pub fn new(registry: Arc<ProviderRegistry>, preferred: &str, prompts_dir: PathBuf) -> Self {
        let mut providers = vec![preferred.to_string()];
        let default = registry.default_provider().to_string();
        if default != preferred {
            providers.push(default);
        }
        Self { registry, providers, prompts_dir }
    }

    /// Same summarizer with `preferred` tried first.
    pub fn with_preferred(&self, preferred: &str) -> Self {
        Self::new(Arc::clone(&self.registry), preferred, self.prompts_dir.clone())
    }

    /// `User: …` / `AI: …` blocks separated by blank lines.
    pub fn render_conversation(turns: &[Turn]) -> String {
        turns
            .iter()
            .map(|t| format!("{}: {}", t.role.speaker(), t.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build_prompt(&self, turns: &[Turn], word_limit: usize) -> String {
        PromptBuilder::new(&self.prompts_dir)
            .layer_or(TEMPLATE_FILE, FALLBACK_TEMPLATE)
            .var("limit", word_limit.to_string())
            .var("conversation", Self::render_conversation(turns))
            .build()
    }

    /// Summarize `turns` in at most roughly `word_limit` words.
    pub async fn summarize(&self, turns: &[Turn], word_limit: usize) -> Option<String> {
        if turns.is_empty() {
            return None;
        }
        let prompt = self.build_prompt(turns, word_limit);

        for id in &self.providers {
            if !self.registry.is_available(id) {
                debug!(provider = %id, "summarizer provider not available");
                continue;
            }
            match self.registry.generate(id, &prompt).await {
                Ok(reply) => {
                    let text = reply.text.trim();
                    if text.is_empty() {
                        warn!(provider = %id, "summarizer returned empty text");
                        continue;
                    }
                    debug!(provider = %id, turns = turns.len(), chars = text.len(), "summary generated");
                    return Some(text.to_string());
                }
                Err(e) => warn!(provider = %id, error = %e, "summarization failed"),
            }
        }
        warn!(turns = turns.len(), "no summary produced; segment omitted");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmProvider, ProviderEntry};

    fn summarizer(entries: Vec<ProviderEntry>, preferred: &str) -> Summarizer {
        let registry = Arc::new(ProviderRegistry::new("dummy", entries));
        Summarizer::new(registry, preferred, PathBuf::from("/nonexistent"))
    }

    #[test]
    fn renders_speaker_labels() {
        let turns = vec![Turn::user("hi"), Turn::assistant("hello")];
        assert_eq!(Summarizer::render_conversation(&turns), "User: hi\n\nAI: hello");
    }

    #[test]
    fn prompt_carries_limit_and_conversation() {
        let s = summarizer(vec![], "openai");
        let p = s.build_prompt(&[Turn::user("question")], 150);
        assert!(p.contains("LIMIT: 150 words"));
        assert!(p.contains("User: question"));
    }

    #[tokio::test]
    async fn falls_back_to_default_provider() {
        let dummy = DummyProvider::new().with_reply("CONVERSATION", "short summary");
        let s = summarizer(
            vec![
                ProviderEntry::unavailable("openai"),
                ProviderEntry::new("dummy", LlmProvider::Dummy(dummy)),
            ],
            "openai",
        );
        let out = s.summarize(&[Turn::user("a"), Turn::assistant("b")], 200).await;
        assert_eq!(out.as_deref(), Some("short summary"));
    }

    #[tokio::test]
    async fn failure_yields_none() {
        let s = summarizer(
            vec![ProviderEntry::new("dummy", LlmProvider::Dummy(DummyProvider::failing("down")))],
            "dummy",
        );
        assert!(s.summarize(&[Turn::user("a")], 200).await.is_none());
    }

    #[tokio::test]
    async fn empty_turns_skip_the_call() {
        let dummy = DummyProvider::new();
        let s = summarizer(
            vec![ProviderEntry::new("dummy", LlmProvider::Dummy(dummy.clone()))],
            "dummy",
        );
        assert!(s.summarize(&[], 200).await.is_none());
        assert!(dummy.calls().is_empty());
    }
}
