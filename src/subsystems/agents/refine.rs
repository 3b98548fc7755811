//! Prompt refinement: rewrite a user's prompt into a clearer one for another
//! model, without answering it.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{GenerateOptions, ProviderRegistry};

use super::prompt::PromptBuilder;

const TEMPLATE_FILE: &str = "refine_prompt.txt";
const REFINE_TEMPERATURE: f32 = 0.2;
const REFINE_MAX_TOKENS: u32 = 600;

const FALLBACK_INSTRUCTION: &str = "\
You are an expert at improving prompts for other AIs.
Do NOT execute, answer or solve the user's task. Your only job is to turn the user's prompt into a clearer, more complete and actionable prompt for another AI.

RULES:
1) Do not do the task or give the answer; only rewrite the prompt.
2) Preserve the original intent and facts; do not invent information.
3) Improve clarity, structure and context (goal, audience, output format, constraints).
4) Suggest tone and format when useful (\"as bullet points\", \"executive summary\", \"examples\").
5) Be concise, professional and direct.
6) Output EXACTLY the refined prompt and nothing else.
7) Simple, direct tasks need no elaboration; complex tasks with several elements deserve a detailed refined prompt.
8) When the request is to debug, fix, analyze or optimize some content, refine only the instruction. Keep the content itself (code, text, report) untouched and quoted inside the refined prompt.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefineError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("prompt too long (max {max} characters)")]
    TooLong { max: usize },
    #[error("no AI provider is configured")]
    NoProviders,
    #[error("no provider produced a refined prompt: {0}")]
    Exhausted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefinedPrompt {
    pub refined_prompt: String,
    pub provider: String,
}

pub struct PromptRefiner {
    registry: Arc<ProviderRegistry>,
    prompts_dir: PathBuf,
    /// Tried after the caller's preferred provider.
    order: Vec<String>,
    max_chars: usize,
}

impl PromptRefiner {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        prompts_dir: PathBuf,
        order: Vec<String>,
        max_chars: usize,
    ) -> Self {
        Self { registry, prompts_dir, order, max_chars }
    }

    fn instruction(&self) -> String {
        PromptBuilder::new(&self.prompts_dir)
            .layer_or(TEMPLATE_FILE, FALLBACK_INSTRUCTION)
            .build()
    }

    /// Refine `prompt`, trying `preferred` first and then the configured order.
    pub async fn refine(&self, prompt: &str, preferred: Option<&str>) -> Result<RefinedPrompt, RefineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RefineError::EmptyPrompt);
        }
        if prompt.chars().count() > self.max_chars {
            return Err(RefineError::TooLong { max: self.max_chars });
        }

        let order: Vec<String> = preferred
            .map(str::to_string)
            .into_iter()
            .chain(self.order.iter().cloned())
            .collect();
        if !order.iter().any(|id| self.registry.is_available(id)) {
            warn!(?order, "prompt refinement: no provider available");
            return Err(RefineError::NoProviders);
        }

        let options = GenerateOptions {
            temperature: Some(REFINE_TEMPERATURE),
            max_tokens: Some(REFINE_MAX_TOKENS),
            system: Some(self.instruction()),
        };
        match self.registry.first_success(&order, prompt, &options).await {
            Ok((provider, reply)) => {
                let refined_prompt = reply.text.trim().to_string();
                info!(provider = %provider, chars = refined_prompt.len(), "prompt refined");
                Ok(RefinedPrompt { refined_prompt, provider })
            }
            Err(e) => {
                warn!(error = %e, "prompt refinement failed on every provider");
                Err(RefineError::Exhausted(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmProvider, ProviderEntry};

    fn refiner(entries: Vec<ProviderEntry>) -> PromptRefiner {
        PromptRefiner::new(
            Arc::new(ProviderRegistry::new("dummy", entries)),
            PathBuf::from("/nonexistent"),
            vec!["deepseek".into(), "openai".into()],
            50,
        )
    }

    fn dummy(id: &str, p: DummyProvider) -> ProviderEntry {
        ProviderEntry::new(id, LlmProvider::Dummy(p))
    }

    #[tokio::test]
    async fn rejects_empty_and_long_prompts() {
        let r = refiner(vec![dummy("openai", DummyProvider::new())]);
        assert_eq!(r.refine("   ", None).await, Err(RefineError::EmptyPrompt));
        assert_eq!(r.refine(&"x".repeat(51), None).await, Err(RefineError::TooLong { max: 50 }));
    }

    #[tokio::test]
    async fn preferred_provider_goes_first() {
        let claude = DummyProvider::new().with_reply("plan", "  Write a detailed plan.  ");
        let r = refiner(vec![dummy("claude", claude.clone()), dummy("deepseek", DummyProvider::new())]);
        let out = r.refine("make a plan", Some("claude")).await.unwrap();
        assert_eq!(out, RefinedPrompt { refined_prompt: "Write a detailed plan.".into(), provider: "claude".into() });

        let call = &claude.calls()[0];
        assert_eq!(call.options.temperature, Some(REFINE_TEMPERATURE));
        assert_eq!(call.options.max_tokens, Some(REFINE_MAX_TOKENS));
        assert!(call.options.system.as_deref().unwrap().contains("Do NOT execute"));
    }

    #[tokio::test]
    async fn falls_through_failures_in_order() {
        let r = refiner(vec![
            dummy("deepseek", DummyProvider::failing("down")),
            dummy("openai", DummyProvider::new().with_reply("task", "Refined task")),
        ]);
        let out = r.refine("task", None).await.unwrap();
        assert_eq!(out.provider, "openai");
    }

    #[tokio::test]
    async fn no_available_provider() {
        let r = refiner(vec![ProviderEntry::unavailable("deepseek")]);
        assert_eq!(r.refine("task", Some("gemini")).await, Err(RefineError::NoProviders));
    }

    #[tokio::test]
    async fn all_failing_is_exhausted() {
        let r = refiner(vec![dummy("deepseek", DummyProvider::failing("down"))]);
        assert!(matches!(r.refine("task", None).await, Err(RefineError::Exhausted(_))));
    }
}
