//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or `LATERAL_CONFIG`) relative to the current
//! working directory, then applies `LATERAL_WORK_DIR` and `LATERAL_LOG_LEVEL`.
//! API keys are only ever read from the environment, never from TOML.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;
use crate::logger::{self, LevelSource};
use crate::subsystems::memory::{MemoryBackendKind, RegenerationPolicy};
use crate::subsystems::routing::ScoringWeights;

/// Bounds for the web-search timeout, in seconds.
pub const SEARCH_TIMEOUT_MIN_SECS: u64 = 8;
pub const SEARCH_TIMEOUT_MAX_SECS: u64 = 30;

/// HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    /// Socket address to bind the HTTP channel to.
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub http: HttpConfig,
}

/// Wire protocol spoken by a provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Dummy,
    #[serde(alias = "openai-compatible")]
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Guess the wire protocol from a provider id when `kind` is omitted.
    fn infer(id: &str) -> Self {
        match id {
            "dummy" => ProviderKind::Dummy,
            "claude" | "anthropic" => ProviderKind::Anthropic,
            "gemini" | "google" => ProviderKind::Gemini,
            _ => ProviderKind::OpenAi,
        }
    }
}

/// One `[llm.<id>]` section, fully resolved.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    /// Full endpoint URL (chat completions / messages), or the API root for Gemini.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    /// Name of the env var holding the key.
    pub api_key_env: String,
    /// Resolved from `api_key_env` at load time. `None` means not configured.
    pub api_key: Option<String>,
    /// Personality file under `{prompts_dir}/personalities/`.
    pub personality: String,
    pub enabled: bool,
}

/// LLM subsystem configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider selected when the caller does not name one.
    pub default_provider: String,
    /// Provider sections in catalog order.
    pub providers: Vec<ProviderConfig>,
}

impl LlmConfig {
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

/// Serper web-search configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub num_results: usize,
    pub hl: String,
    pub gl: String,
    /// Clamped to `SEARCH_TIMEOUT_MIN_SECS..=SEARCH_TIMEOUT_MAX_SECS`.
    pub timeout_seconds: u64,
    pub api_key: Option<String>,
}

/// Conversation memory configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub backend: MemoryBackendKind,
    pub window_size: usize,
    pub max_conversations: usize,
    pub sweep_interval_secs: u64,
    pub old_summary_words: usize,
    pub recent_summary_words: usize,
    /// Provider tried first for summaries; the LLM default is the fallback.
    pub summarizer: String,
    pub regenerate_on: RegenerationPolicy,
    /// Cap for transcript entries per conversation (file backend only).
    pub transcript_cap: Option<usize>,
}

/// Provider recommendation configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub catalog: PathBuf,
    /// First messages at or below this many characters get no advice.
    pub min_prompt_chars: usize,
    pub weights: ScoringWeights,
}

/// Orchestration and prompt configuration.
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    pub prompts_dir: PathBuf,
    /// Fallback order for prompt refinement (after the caller's provider).
    pub refine_order: Vec<String>,
    pub refine_max_chars: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub comms: CommsConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub memory: MemoryConfig,
    pub routing: RoutingConfig,
    pub agents: AgentsConfig,
}

impl Config {
    /// Returns `true` if the HTTP channel is enabled and compiled in.
    pub fn comms_http_should_load(&self) -> bool {
        cfg!(feature = "channel-axum") && self.comms.http.enabled
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    server: RawServer,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    search: RawSearch,
    #[serde(default)]
    memory: RawMemory,
    #[serde(default)]
    routing: RawRouting,
    #[serde(default)]
    agents: RawAgents,
}

#[derive(Deserialize)]
struct RawServer {
    name: String,
    work_dir: String,
    log_level: String,
}

#[derive(Deserialize, Default)]
struct RawComms {
    #[serde(default)]
    http: RawHttp,
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: true, bind: default_http_bind() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    default_provider: String,
    /// Catalog order; sections not listed here follow in id order.
    #[serde(default)]
    order: Vec<String>,
    /// All `[llm.<id>]` subsections.
    #[serde(flatten)]
    entries: HashMap<String, RawProviderEntry>,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            default_provider: default_llm_provider(),
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawProviderEntry {
    #[serde(default)]
    kind: Option<ProviderKind>,
    #[serde(default)]
    api_base_url: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_provider_timeout")]
    timeout_seconds: u64,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    personality: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawSearch {
    #[serde(default = "default_search_endpoint")]
    endpoint: String,
    #[serde(default = "default_search_results")]
    num_results: usize,
    #[serde(default = "default_search_hl")]
    hl: String,
    #[serde(default = "default_search_gl")]
    gl: String,
    #[serde(default = "default_search_timeout")]
    timeout_seconds: u64,
    #[serde(default = "default_search_key_env")]
    api_key_env: String,
}

impl Default for RawSearch {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            num_results: default_search_results(),
            hl: default_search_hl(),
            gl: default_search_gl(),
            timeout_seconds: default_search_timeout(),
            api_key_env: default_search_key_env(),
        }
    }
}

#[derive(Deserialize)]
struct RawMemory {
    #[serde(default)]
    backend: MemoryBackendKind,
    #[serde(default = "default_window_size")]
    window_size: usize,
    #[serde(default = "default_max_conversations")]
    max_conversations: usize,
    #[serde(default = "default_sweep_interval")]
    sweep_interval_secs: u64,
    #[serde(default = "default_old_summary_words")]
    old_summary_words: usize,
    #[serde(default = "default_recent_summary_words")]
    recent_summary_words: usize,
    #[serde(default = "default_summarizer")]
    summarizer: String,
    #[serde(default)]
    regenerate_on: RegenerationPolicy,
    #[serde(default)]
    transcript_cap: Option<usize>,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self {
            backend: MemoryBackendKind::default(),
            window_size: default_window_size(),
            max_conversations: default_max_conversations(),
            sweep_interval_secs: default_sweep_interval(),
            old_summary_words: default_old_summary_words(),
            recent_summary_words: default_recent_summary_words(),
            summarizer: default_summarizer(),
            regenerate_on: RegenerationPolicy::default(),
            transcript_cap: None,
        }
    }
}

#[derive(Deserialize)]
struct RawRouting {
    #[serde(default = "default_catalog")]
    catalog: String,
    #[serde(default = "default_min_prompt_chars")]
    min_prompt_chars: usize,
    #[serde(default)]
    weights: ScoringWeights,
}

impl Default for RawRouting {
    fn default() -> Self {
        Self {
            catalog: default_catalog(),
            min_prompt_chars: default_min_prompt_chars(),
            weights: ScoringWeights::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawAgents {
    #[serde(default = "default_prompts_dir")]
    prompts_dir: String,
    #[serde(default = "default_refine_order")]
    refine_order: Vec<String>,
    #[serde(default = "default_refine_max_chars")]
    refine_max_chars: usize,
}

impl Default for RawAgents {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            refine_order: default_refine_order(),
            refine_max_chars: default_refine_max_chars(),
        }
    }
}

fn default_true() -> bool { true }
fn default_http_bind() -> String { "127.0.0.1:5001".to_string() }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 4500 }
fn default_provider_timeout() -> u64 { 60 }
fn default_search_endpoint() -> String { "https://google.serper.dev/search".to_string() }
fn default_search_results() -> usize { 6 }
fn default_search_hl() -> String { "pt-br".to_string() }
fn default_search_gl() -> String { "br".to_string() }
fn default_search_timeout() -> u64 { SEARCH_TIMEOUT_MIN_SECS }
fn default_search_key_env() -> String { "SEARCH_API_KEY".to_string() }
fn default_window_size() -> usize { 8 }
fn default_max_conversations() -> usize { 10 }
fn default_sweep_interval() -> u64 { 300 }
fn default_old_summary_words() -> usize { 150 }
fn default_recent_summary_words() -> usize { 200 }
fn default_summarizer() -> String { "openai".to_string() }
fn default_catalog() -> String { "config/profiles.toml".to_string() }
fn default_min_prompt_chars() -> usize { 10 }
fn default_prompts_dir() -> String { "config/prompts".to_string() }
fn default_refine_max_chars() -> usize { 4000 }

fn default_refine_order() -> Vec<String> {
    ["deepseek", "openai", "claude", "gemini"].iter().map(|s| s.to_string()).collect()
}

/// Built-in endpoint, model and key variable for well-known provider ids.
fn provider_defaults(id: &str, kind: ProviderKind) -> (&'static str, &'static str, &'static str) {
    match (id, kind) {
        ("deepseek", ProviderKind::OpenAi) => (
            "https://api.deepseek.com/chat/completions",
            "deepseek-chat",
            "DEEPSEEK_API_KEY",
        ),
        (_, ProviderKind::OpenAi) => (
            "https://api.openai.com/v1/chat/completions",
            "gpt-4o",
            "OPENAI_API_KEY",
        ),
        (_, ProviderKind::Anthropic) => (
            "https://api.anthropic.com/v1/messages",
            "claude-sonnet-4-20250514",
            "ANTHROPIC_API_KEY",
        ),
        (_, ProviderKind::Gemini) => (
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-pro",
            "GEMINI_API_KEY",
        ),
        (_, ProviderKind::Dummy) => ("", "dummy", ""),
    }
}

/// Load config from `LATERAL_CONFIG` or `config/default.toml`, then apply env overrides.
pub fn load(path_override: Option<&str>) -> Result<Config, AppError> {
    let env_path = env::var("LATERAL_CONFIG").ok();
    let path = path_override
        .or(env_path.as_deref())
        .unwrap_or("config/default.toml");
    let work_dir_override = env::var("LATERAL_WORK_DIR").ok();
    let log_level_override = env::var("LATERAL_LOG_LEVEL").ok();
    load_from(
        Path::new(path),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader. Accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let s = parsed.server;
    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let (log_level, level_source) = match log_level_override {
        Some(level) => (level.to_string(), LevelSource::Env),
        None => (s.log_level, LevelSource::Config),
    };
    logger::validate_level(&log_level, level_source)?;

    let llm = resolve_llm(parsed.llm)?;
    let search = resolve_search(parsed.search);
    let memory = resolve_memory(parsed.memory)?;

    Ok(Config {
        name: s.name,
        work_dir,
        log_level,
        comms: CommsConfig {
            http: HttpConfig {
                enabled: parsed.comms.http.enabled,
                bind: parsed.comms.http.bind,
            },
        },
        llm,
        search,
        memory,
        routing: RoutingConfig {
            catalog: PathBuf::from(parsed.routing.catalog),
            min_prompt_chars: parsed.routing.min_prompt_chars,
            weights: parsed.routing.weights,
        },
        agents: AgentsConfig {
            prompts_dir: PathBuf::from(parsed.agents.prompts_dir),
            refine_order: parsed.agents.refine_order,
            refine_max_chars: parsed.agents.refine_max_chars,
        },
    })
}

fn resolve_llm(raw: RawLlm) -> Result<LlmConfig, AppError> {
    let RawLlm { default_provider, order, mut entries } = raw;

    // Listed ids first, then the rest alphabetically so catalog order is stable.
    let mut ids: Vec<String> = order
        .into_iter()
        .filter(|id| entries.contains_key(id))
        .collect();
    let mut rest: Vec<String> = entries
        .keys()
        .filter(|id| !ids.contains(id))
        .cloned()
        .collect();
    rest.sort();
    ids.extend(rest);

    let mut providers = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(entry) = entries.remove(&id) else { continue };
        let kind = entry.kind.unwrap_or_else(|| ProviderKind::infer(&id));
        let (url, model, key_env) = provider_defaults(&id, kind);
        let api_key_env = entry.api_key_env.unwrap_or_else(|| key_env.to_string());
        let api_key = if api_key_env.is_empty() {
            None
        } else {
            env::var(&api_key_env).ok().filter(|k| !k.trim().is_empty())
        };
        providers.push(ProviderConfig {
            personality: entry.personality.unwrap_or_else(|| format!("{id}.md")),
            id,
            kind,
            api_base_url: entry.api_base_url.unwrap_or_else(|| url.to_string()),
            model: entry.model.unwrap_or_else(|| model.to_string()),
            temperature: entry.temperature,
            max_tokens: entry.max_tokens,
            timeout_seconds: entry.timeout_seconds,
            api_key_env,
            api_key,
            enabled: entry.enabled,
        });
    }

    // A config with no provider sections still gets a working keyless backend.
    if providers.is_empty() {
        providers.push(ProviderConfig {
            id: "dummy".into(),
            kind: ProviderKind::Dummy,
            api_base_url: String::new(),
            model: "dummy".into(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_seconds: default_provider_timeout(),
            api_key_env: String::new(),
            api_key: None,
            personality: "dummy.md".into(),
            enabled: true,
        });
    }

    if !providers.iter().any(|p| p.id == default_provider) {
        return Err(AppError::Config(format!(
            "default provider '{default_provider}' has no [llm.{default_provider}] section"
        )));
    }

    Ok(LlmConfig { default_provider, providers })
}

fn resolve_search(raw: RawSearch) -> SearchConfig {
    let timeout_seconds = raw
        .timeout_seconds
        .clamp(SEARCH_TIMEOUT_MIN_SECS, SEARCH_TIMEOUT_MAX_SECS);
    if timeout_seconds != raw.timeout_seconds {
        warn!(
            configured = raw.timeout_seconds,
            effective = timeout_seconds,
            "search timeout out of range; clamped"
        );
    }
    SearchConfig {
        endpoint: raw.endpoint,
        num_results: raw.num_results,
        hl: raw.hl,
        gl: raw.gl,
        timeout_seconds,
        api_key: env::var(&raw.api_key_env).ok().filter(|k| !k.trim().is_empty()),
    }
}

fn resolve_memory(raw: RawMemory) -> Result<MemoryConfig, AppError> {
    if raw.window_size == 0 {
        return Err(AppError::Config("memory.window_size must be at least 1".into()));
    }
    if raw.max_conversations == 0 {
        return Err(AppError::Config("memory.max_conversations must be at least 1".into()));
    }
    if raw.sweep_interval_secs == 0 {
        return Err(AppError::Config("memory.sweep_interval_secs must be at least 1".into()));
    }
    if let Some(cap) = raw.transcript_cap {
        // A transcript holding less than one exchange never reaches memory.
        if cap < 2 {
            return Err(AppError::Config("memory.transcript_cap must be at least 2".into()));
        }
        if cap <= raw.window_size {
            warn!(
                transcript_cap = cap,
                window_size = raw.window_size,
                "transcript cap does not exceed the memory window; older turns will never be summarized"
            );
        }
    }
    Ok(MemoryConfig {
        backend: raw.backend,
        window_size: raw.window_size,
        max_conversations: raw.max_conversations,
        sweep_interval_secs: raw.sweep_interval_secs,
        old_summary_words: raw.old_summary_words,
        recent_summary_words: raw.recent_summary_words,
        summarizer: raw.summarizer,
        regenerate_on: raw.regenerate_on,
        transcript_cap: raw.transcript_cap,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests: dummy LLM, no API keys, no external calls.
#[cfg(test)]
impl Config {
    pub fn test_default(work_dir: &Path) -> Self {
        Self {
            name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            comms: CommsConfig {
                http: HttpConfig { enabled: false, bind: default_http_bind() },
            },
            llm: LlmConfig {
                default_provider: "dummy".into(),
                providers: vec![ProviderConfig {
                    id: "dummy".into(),
                    kind: ProviderKind::Dummy,
                    api_base_url: String::new(),
                    model: "dummy".into(),
                    temperature: 0.0,
                    max_tokens: 100,
                    timeout_seconds: 1,
                    api_key_env: String::new(),
                    api_key: None,
                    personality: "dummy.md".into(),
                    enabled: true,
                }],
            },
            search: SearchConfig {
                endpoint: "http://localhost:0/search".into(),
                num_results: 6,
                hl: "pt-br".into(),
                gl: "br".into(),
                timeout_seconds: SEARCH_TIMEOUT_MIN_SECS,
                api_key: None,
            },
            memory: MemoryConfig {
                backend: MemoryBackendKind::Tmp,
                window_size: 8,
                max_conversations: 10,
                sweep_interval_secs: 300,
                old_summary_words: 150,
                recent_summary_words: 200,
                summarizer: "dummy".into(),
                regenerate_on: RegenerationPolicy::Count,
                transcript_cap: None,
            },
            routing: RoutingConfig {
                catalog: work_dir.join("profiles.toml"),
                min_prompt_chars: 10,
                weights: ScoringWeights::default(),
            },
            agents: AgentsConfig {
                prompts_dir: work_dir.join("prompts"),
                refine_order: default_refine_order(),
                refine_max_chars: 4000,
            },
        }
    }
}
