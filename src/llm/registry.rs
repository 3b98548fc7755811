//! Configured providers, keyed by id.
//!
//! A provider is *available* when its section is enabled and its backend
//! could be built (hosted backends need an API key). Unavailable providers
//! stay listed so status output can explain why they cannot be used.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::{GenerateOptions, LlmProvider, LlmResponse, ProviderError, providers};

/// Token ceiling for classification calls.
pub const CLASSIFY_MAX_TOKENS: u32 = 300;

/// One configured provider.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub id: String,
    pub model: String,
    /// `None` when the backend could not be built or the section is disabled.
    pub provider: Option<LlmProvider>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// System message sent with every answer from this provider.
    pub personality: Option<String>,
}

impl ProviderEntry {
    pub fn new(id: impl Into<String>, provider: LlmProvider) -> Self {
        Self {
            id: id.into(),
            model: String::new(),
            provider: Some(provider),
            temperature: 0.7,
            max_tokens: 4500,
            personality: None,
        }
    }

    /// A listed provider that cannot be called.
    pub fn unavailable(id: impl Into<String>) -> Self {
        Self { provider: None, ..Self::new(id, LlmProvider::Dummy(Default::default())) }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }
}

/// Availability row for `GET /api/providers` and `/api/status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderStatus {
    pub id: String,
    pub kind: &'static str,
    pub model: String,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
    default_provider: String,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>, entries: Vec<ProviderEntry>) -> Self {
        Self { entries, default_provider: default_provider.into() }
    }

    /// Build every `[llm.<id>]` section. Personality files are read from
    /// `{prompts_dir}/personalities/`; a missing file means no system message.
    pub fn from_config(config: &LlmConfig, prompts_dir: &Path) -> Self {
        let mut entries = Vec::with_capacity(config.providers.len());
        for section in &config.providers {
            let provider = if !section.enabled {
                debug!(provider = %section.id, "provider disabled in config");
                None
            } else {
                match providers::build(section) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!(provider = %section.id, error = %e, "provider not available");
                        None
                    }
                }
            };
            let personality = fs::read_to_string(
                prompts_dir.join("personalities").join(&section.personality),
            )
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

            entries.push(ProviderEntry {
                id: section.id.clone(),
                model: section.model.clone(),
                provider,
                temperature: section.temperature,
                max_tokens: section.max_tokens,
                personality,
            });
        }

        let available: Vec<&str> = entries
            .iter()
            .filter(|e| e.is_available())
            .map(|e| e.id.as_str())
            .collect();
        info!(default = %config.default_provider, ?available, "provider registry ready");

        Self::new(config.default_provider.clone(), entries)
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id && e.is_available())
    }

    /// Ids of callable providers in catalog order.
    pub fn available_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_available())
            .map(|e| e.id.clone())
            .collect()
    }

    /// Look up a callable provider; `None` picks the default.
    pub fn resolve(&self, id: Option<&str>) -> Result<(&ProviderEntry, &LlmProvider), ProviderError> {
        let id = id.unwrap_or(&self.default_provider);
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))?;
        let provider = entry
            .provider
            .as_ref()
            .ok_or_else(|| ProviderError::Unavailable(id.to_string()))?;
        Ok((entry, provider))
    }

    /// Answer `prompt` with the provider's own temperature, token limit and
    /// personality.
    pub async fn generate(&self, id: &str, prompt: &str) -> Result<LlmResponse, ProviderError> {
        let (entry, provider) = self.resolve(Some(id))?;
        let options = GenerateOptions {
            temperature: Some(entry.temperature),
            max_tokens: Some(entry.max_tokens),
            system: entry.personality.clone(),
        };
        provider.complete(prompt, &options).await
    }

    /// Deterministic short completion for routing decisions. The provider's
    /// personality is kept as the system message.
    pub async fn classify(&self, id: &str, prompt: &str) -> Result<LlmResponse, ProviderError> {
        let (entry, provider) = self.resolve(Some(id))?;
        let options = GenerateOptions {
            system: entry.personality.clone(),
            ..GenerateOptions::deterministic(CLASSIFY_MAX_TOKENS)
        };
        provider.complete(prompt, &options).await
    }

    pub async fn complete_with(
        &self,
        id: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<LlmResponse, ProviderError> {
        let (_, provider) = self.resolve(Some(id))?;
        provider.complete(prompt, options).await
    }

    /// Try providers in `order`, skipping unavailable ones and duplicates.
    /// Returns the first non-empty reply with the id that produced it.
    ///
    /// `Unavailable` when nothing in `order` could be called, otherwise the
    /// last request error.
    pub async fn first_success(
        &self,
        order: &[String],
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<(String, LlmResponse), ProviderError> {
        let mut tried: Vec<&str> = Vec::new();
        let mut last_err = None;
        for id in order {
            if tried.contains(&id.as_str()) || !self.is_available(id) {
                continue;
            }
            tried.push(id);
            match self.complete_with(id, prompt, options).await {
                Ok(r) if !r.text.trim().is_empty() => return Ok((id.clone(), r)),
                Ok(_) => {
                    warn!(provider = %id, "empty reply; trying next provider");
                    last_err = Some(ProviderError::Request(format!("{id}: empty reply")));
                }
                Err(e) => {
                    warn!(provider = %id, error = %e, "provider failed; trying next provider");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("no provider available".into())))
    }

    /// Ping every available provider. Unavailable providers report `false`
    /// without a network call.
    pub async fn probe(&self) -> Vec<(String, bool)> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let reachable = match &entry.provider {
                Some(p) => match p.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(provider = %entry.id, error = %e, "provider unreachable");
                        false
                    }
                },
                None => false,
            };
            out.push((entry.id.clone(), reachable));
        }
        out
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        self.entries
            .iter()
            .map(|e| ProviderStatus {
                id: e.id.clone(),
                kind: e.provider.as_ref().map(LlmProvider::kind).unwrap_or("none"),
                model: e.model.clone(),
                available: e.is_available(),
            })
            .collect()
    }
}
