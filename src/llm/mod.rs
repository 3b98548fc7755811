//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities; clone them freely.
//! [`registry::ProviderRegistry`] owns the configured set and is the only
//! thing the rest of the crate talks to.

pub mod providers;
pub mod registry;

use thiserror::Error;

pub use registry::{ProviderEntry, ProviderRegistry, ProviderStatus};

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    /// Known provider that is disabled or has no API key.
    #[error("provider not available: {0}")]
    Unavailable(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Request / response ────────────────────────────────────────────────────────

/// Per-call generation parameters. `None` fields fall back to the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system: Option<String>,
}

impl GenerateOptions {
    /// Deterministic, short completion used for classification calls.
    pub fn deterministic(max_tokens: u32) -> Self {
        Self { temperature: Some(0.0), max_tokens: Some(max_tokens), system: None }
    }
}

/// Text reply from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    /// The provider stopped because it hit the output token limit.
    pub truncated: bool,
}

impl LlmResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), truncated: false }
    }
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Anthropic(providers::anthropic::AnthropicProvider),
    Gemini(providers::gemini::GeminiProvider),
}

impl LlmProvider {
    /// Send `content` as a single user turn and return the reply.
    pub async fn complete(
        &self,
        content: &str,
        options: &GenerateOptions,
    ) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(content, options).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(content, options).await,
            LlmProvider::Anthropic(p) => p.complete(content, options).await,
            LlmProvider::Gemini(p) => p.complete(content, options).await,
        }
    }

    /// Reachability probe; the dummy backend is always reachable.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            LlmProvider::Dummy(_) => Ok(()),
            LlmProvider::OpenAiCompatible(p) => p.ping().await,
            LlmProvider::Anthropic(p) => p.ping().await,
            LlmProvider::Gemini(p) => p.ping().await,
        }
    }

    /// Short name of the wire protocol, for status output.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai",
            LlmProvider::Anthropic(_) => "anthropic",
            LlmProvider::Gemini(_) => "gemini",
        }
    }
}
