//! Dummy LLM provider: echoes input back prefixed with `[echo]`.
//!
//! Used for running the full turn without a real API key. Tests can script
//! replies keyed on a substring of the prompt and inspect recorded calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::llm::{GenerateOptions, LlmResponse, ProviderError};

#[derive(Debug, Clone)]
enum Outcome {
    Reply { text: String, truncated: bool },
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    outcome: Outcome,
}

/// One recorded `complete` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DummyCall {
    pub content: String,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    rules: Vec<Rule>,
    fallback_failure: Option<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<DummyCall>>>,
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `message` unless a rule matches first.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { fallback_failure: Some(message.into()), ..Self::default() }
    }

    /// Reply with `text` whenever the prompt contains `needle`.
    pub fn with_reply(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            outcome: Outcome::Reply { text: text.into(), truncated: false },
        });
        self
    }

    /// Like [`with_reply`](Self::with_reply) but flags the reply as cut off.
    pub fn with_truncated_reply(
        mut self,
        needle: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            outcome: Outcome::Reply { text: text.into(), truncated: true },
        });
        self
    }

    /// Fail whenever the prompt contains `needle`.
    pub fn with_failure(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule { needle: needle.into(), outcome: Outcome::Fail(message.into()) });
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<DummyCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn complete(
        &self,
        content: &str,
        options: &GenerateOptions,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DummyCall { content: content.to_string(), options: options.clone() });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .rules
            .iter()
            .find(|r| content.contains(&r.needle))
            .map(|r| r.outcome.clone());

        match outcome {
            Some(Outcome::Reply { text, truncated }) => Ok(LlmResponse { text, truncated }),
            Some(Outcome::Fail(msg)) => Err(ProviderError::Request(msg)),
            None => match &self.fallback_failure {
                Some(msg) => Err(ProviderError::Request(msg.clone())),
                None => Ok(LlmResponse::new(format!("[echo] {content}"))),
            },
        }
    }
}
