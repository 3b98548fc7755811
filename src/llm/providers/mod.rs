//! LLM provider implementations.
//!
//! `build(config)` is the factory, called once per `[llm.<id>]` section at
//! startup. Adding a new backend = new module + new match arm.

pub mod anthropic;
pub mod dummy;
pub mod gemini;
pub mod openai_compatible;

use std::time::Duration;

use reqwest::Client;

use crate::config::{ProviderConfig, ProviderKind};
use crate::llm::{LlmProvider, ProviderError};

/// Lightweight reachability probe shared by the HTTP backends.
///
/// Any HTTP response (including 4xx) means the server is reachable. Only a
/// transport-level failure counts as unreachable. Hard 5-second timeout
/// regardless of the provider's own timeout.
pub(crate) async fn head_probe(url: &str) -> Result<(), ProviderError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| ProviderError::Request(format!("failed to build ping client: {e}")))?;
    client
        .head(url)
        .send()
        .await
        .map(|_| ())
        .map_err(|e| ProviderError::Request(format!("unreachable: {}", e.without_url())))
}

/// Construct a `LlmProvider` from a resolved provider section.
///
/// Returns `Unavailable` for hosted backends without an API key; the
/// registry records those as configured but not callable.
pub fn build(config: &ProviderConfig) -> Result<LlmProvider, ProviderError> {
    let missing_key = || {
        ProviderError::Unavailable(format!("{} (set {})", config.id, config.api_key_env))
    };
    match config.kind {
        ProviderKind::Dummy => Ok(LlmProvider::Dummy(dummy::DummyProvider::new())),
        ProviderKind::OpenAi => {
            let key = config.api_key.clone().ok_or_else(missing_key)?;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
                config.timeout_seconds,
                Some(key),
            )?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        ProviderKind::Anthropic => {
            let key = config.api_key.clone().ok_or_else(missing_key)?;
            let p = anthropic::AnthropicProvider::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
                config.timeout_seconds,
                key,
            )?;
            Ok(LlmProvider::Anthropic(p))
        }
        ProviderKind::Gemini => {
            let key = config.api_key.clone().ok_or_else(missing_key)?;
            let p = gemini::GeminiProvider::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
                config.timeout_seconds,
                key,
            )?;
            Ok(LlmProvider::Gemini(p))
        }
    }
}
