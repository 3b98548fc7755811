//! Provider recommendation.
//!
//! [`RecommendationEngine`] scores a prompt against a static catalog of
//! [`ProviderProfile`]s loaded from `config/profiles.toml`. It is a pure
//! function of (prompt, catalog, weights): no I/O after construction, no
//! randomness. When no profile matches anything in the prompt, the keyword
//! classifier in [`heuristic`] decides instead.

pub mod heuristic;
pub mod normalize;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;

pub use heuristic::{Suggestion, TaskType, detect_task_type, suggestion};
pub use normalize::normalize;

/// Longest reason string returned to callers, in characters.
pub const MAX_REASON_CHARS: usize = 160;
const REASON_WORDS: usize = 12;
const DEFAULT_REASON: &str = "Suited to the described need";

/// Scoring weights. Every field can be overridden under `[routing.weights]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Per profile tag found in the prompt.
    pub tag: f64,
    /// Per specialty phrase found in the prompt as whole words.
    pub specialty: f64,
    /// Per prompt word found as a whole word in the profile text.
    pub token_exact: f64,
    /// Per prompt word found only as a substring of the profile text.
    pub token_partial: f64,
    /// Per ideal use case found in the prompt.
    pub use_case: f64,
    /// Upper bound of the descriptiveness boost.
    pub descriptiveness_cap: f64,
    /// (strengths + specialties) / divisor, capped.
    pub descriptiveness_divisor: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            tag: 4.0,
            specialty: 3.0,
            token_exact: 1.5,
            token_partial: 0.7,
            use_case: 1.2,
            descriptiveness_cap: 0.5,
            descriptiveness_divisor: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub ideal_use_cases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    profiles: Vec<ProviderProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSource {
    Catalog,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub provider_id: String,
    pub reason: String,
    pub source: RecommendationSource,
}

/// Normalized phrases of one profile, computed once at load.
#[derive(Debug, Clone)]
struct ProfileIndex {
    /// All profile phrases, normalized and padded with one space each side.
    full_text: String,
    tags: Vec<String>,
    specialties: Vec<String>,
    use_cases: Vec<String>,
    descriptiveness: f64,
}

impl ProfileIndex {
    fn build(profile: &ProviderProfile, weights: &ScoringWeights) -> Self {
        let normalized = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| normalize(s)).filter(|s| !s.is_empty()).collect()
        };
        let raw = [
            profile.tags.join(" "),
            profile.specialties.join(" "),
            profile.strengths.join(" "),
            profile.ideal_use_cases.join(" "),
        ]
        .join(" ");

        let described = (profile.strengths.len() + profile.specialties.len()) as f64;
        let descriptiveness = if weights.descriptiveness_divisor > 0.0 {
            (described / weights.descriptiveness_divisor).min(weights.descriptiveness_cap)
        } else {
            0.0
        };

        Self {
            full_text: format!(" {} ", normalize(&raw)),
            tags: normalized(&profile.tags),
            specialties: normalized(&profile.specialties),
            use_cases: normalized(&profile.ideal_use_cases),
            descriptiveness,
        }
    }

    /// Match score, excluding the descriptiveness boost.
    fn signal(&self, prompt_padded: &str, words: &[&str], weights: &ScoringWeights) -> f64 {
        let mut score = 0.0;

        for tag in &self.tags {
            if prompt_padded.contains(tag.as_str()) {
                score += weights.tag;
            }
        }
        for spec in &self.specialties {
            if prompt_padded.contains(&format!(" {spec} ")) {
                score += weights.specialty;
            }
        }
        for word in words {
            if self.full_text.contains(&format!(" {word} ")) {
                score += weights.token_exact;
            } else if self.full_text.contains(word) {
                score += weights.token_partial;
            }
        }
        for use_case in &self.use_cases {
            if prompt_padded.contains(use_case.as_str()) {
                score += weights.use_case;
            }
        }
        score
    }
}

#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    profiles: Vec<ProviderProfile>,
    index: Vec<ProfileIndex>,
    weights: ScoringWeights,
}

impl RecommendationEngine {
    pub fn new(profiles: Vec<ProviderProfile>, weights: ScoringWeights) -> Self {
        let index = profiles.iter().map(|p| ProfileIndex::build(p, &weights)).collect();
        Self { profiles, index, weights }
    }

    /// Load a `[[profiles]]` TOML catalog. A missing file yields an empty
    /// catalog (heuristic only); a malformed one is a config error.
    pub fn from_file(path: &Path, weights: ScoringWeights) -> Result<Self, AppError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "profile catalog not found; heuristic routing only");
                return Ok(Self::new(Vec::new(), weights));
            }
            Err(e) => return Err(e.into()),
        };
        let catalog: CatalogFile = toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("invalid profile catalog {}: {e}", path.display())))?;
        info!(path = %path.display(), profiles = catalog.profiles.len(), "profile catalog loaded");
        Ok(Self::new(catalog.profiles, weights))
    }

    pub fn profiles(&self) -> &[ProviderProfile] {
        &self.profiles
    }

    /// Best-suited provider for `prompt`. Deterministic for a given catalog.
    pub fn recommend(&self, prompt: &str) -> Recommendation {
        let prompt_norm = normalize(prompt);
        let words: Vec<&str> = prompt_norm.split(' ').filter(|w| !w.is_empty()).collect();
        let padded = format!(" {prompt_norm} ");

        // (index, signal, total); strict comparison keeps the earlier profile on ties.
        let mut best: Option<(usize, f64, f64)> = None;
        for (i, profile) in self.index.iter().enumerate() {
            let signal = profile.signal(&padded, &words, &self.weights);
            let total = signal + profile.descriptiveness;
            if best.is_none_or(|(_, _, top)| total > top) {
                best = Some((i, signal, total));
            }
        }

        match best {
            Some((i, signal, total)) if signal > 0.0 => {
                let chosen = &self.profiles[i];
                debug!(provider = %chosen.id, score = total, "catalog recommendation");
                Recommendation {
                    provider_id: chosen.id.clone(),
                    reason: catalog_reason(chosen),
                    source: RecommendationSource::Catalog,
                }
            }
            _ => self.heuristic(prompt),
        }
    }

    fn heuristic(&self, prompt: &str) -> Recommendation {
        let task = detect_task_type(prompt);
        let hint = suggestion(task);
        let provider_id = self
            .profiles
            .iter()
            .find(|p| p.id == hint.provider_id)
            .or_else(|| self.profiles.first())
            .map(|p| p.id.clone())
            .unwrap_or_else(|| hint.provider_id.to_string());
        debug!(provider = %provider_id, task = %task, "heuristic recommendation");
        Recommendation {
            provider_id,
            reason: truncate_chars(hint.reason, MAX_REASON_CHARS),
            source: RecommendationSource::Heuristic,
        }
    }
}

/// First strength (else first specialty), normalized, first twelve words.
fn catalog_reason(profile: &ProviderProfile) -> String {
    let candidate = profile
        .strengths
        .first()
        .or_else(|| profile.specialties.first())
        .map(String::as_str)
        .unwrap_or_default();
    let reason = normalize(candidate)
        .split(' ')
        .filter(|w| !w.is_empty())
        .take(REASON_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    if reason.is_empty() {
        DEFAULT_REASON.to_string()
    } else {
        truncate_chars(&reason, MAX_REASON_CHARS)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn profile(id: &str, tags: &[&str], specialties: &[&str], strengths: &[&str]) -> ProviderProfile {
        let own = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        ProviderProfile {
            id: id.into(),
            tags: own(tags),
            specialties: own(specialties),
            strengths: own(strengths),
            ideal_use_cases: Vec::new(),
        }
    }

    fn catalog() -> RecommendationEngine {
        RecommendationEngine::new(
            vec![
                profile("openai", &["email", "texto"], &["conversas"], &["Bom para conversas e edição de texto"]),
                profile("claude", &["relatorio", "analise"], &["relatórios estruturados"], &["Estrutura e rigor"]),
                profile("deepseek", &["codigo", "programar"], &["depuração"], &["Precisão técnica em programação"]),
                profile("gemini", &["organizar", "planejar"], &["produtividade"], &["Organização"]),
            ],
            ScoringWeights::default(),
        )
    }

    #[test]
    fn programming_prompt_picks_deepseek() {
        let rec = catalog().recommend("me ajude a programar uma função em javascript");
        assert_eq!(rec.provider_id, "deepseek");
        assert_eq!(rec.source, RecommendationSource::Catalog);
        assert_eq!(rec.reason, "precisao tecnica em programacao");
    }

    #[test]
    fn recommendation_is_deterministic() {
        let engine = catalog();
        let prompt = "preciso de um relatório com análise de vendas";
        let first = engine.recommend(prompt);
        for _ in 0..10 {
            assert_eq!(engine.recommend(prompt), first);
        }
        assert_eq!(first.provider_id, "claude");
    }

    #[test]
    fn ties_go_to_catalog_order() {
        let engine = RecommendationEngine::new(
            vec![profile("first", &["rust"], &[], &[]), profile("second", &["rust"], &[], &[])],
            ScoringWeights::default(),
        );
        assert_eq!(engine.recommend("rust").provider_id, "first");
    }

    #[test]
    fn no_signal_falls_back_to_heuristic() {
        let engine = catalog();
        let rec = engine.recommend("zzz qqq");
        assert_eq!(rec.source, RecommendationSource::Heuristic);
        assert_eq!(rec.provider_id, "openai");
        assert_eq!(rec.reason, suggestion(TaskType::General).reason);
    }

    #[test]
    fn heuristic_without_matching_profile_uses_first_profile() {
        let engine = RecommendationEngine::new(vec![profile("solo", &["x"], &[], &[])], ScoringWeights::default());
        let rec = engine.recommend("qwerty");
        assert_eq!(rec.provider_id, "solo");
        assert_eq!(rec.source, RecommendationSource::Heuristic);
    }

    #[test]
    fn empty_catalog_uses_suggestion_table() {
        let engine = RecommendationEngine::new(Vec::new(), ScoringWeights::default());
        let rec = engine.recommend("debug this code");
        assert_eq!(rec.provider_id, "deepseek");
        assert_eq!(rec.source, RecommendationSource::Heuristic);
    }

    #[test]
    fn weights_are_tunable() {
        let weights = ScoringWeights { tag: 0.0, token_exact: 0.0, token_partial: 0.0, ..Default::default() };
        let engine = RecommendationEngine::new(
            vec![profile("a", &["alpha"], &[], &[]), profile("b", &[], &["beta words"], &[])],
            weights,
        );
        assert_eq!(engine.recommend("alpha and beta words").provider_id, "b");
    }

    #[test]
    fn reason_is_capped() {
        let long = "word ".repeat(40);
        let p = profile("p", &["x"], &[], &[long.as_str()]);
        let reason = catalog_reason(&p);
        assert_eq!(reason.split(' ').count(), REASON_WORDS);
        assert!(reason.chars().count() <= MAX_REASON_CHARS);
    }

    #[test]
    fn loads_toml_catalog() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[[profiles]]
id = "deepseek"
tags = ["codigo", "programar"]
strengths = ["Precisão técnica"]

[[profiles]]
id = "openai"
tags = ["email"]
"#
        )
        .unwrap();
        let engine = RecommendationEngine::from_file(f.path(), ScoringWeights::default()).unwrap();
        assert_eq!(engine.profiles().len(), 2);
        assert_eq!(engine.recommend("escreva um email").provider_id, "openai");
    }

    #[test]
    fn missing_catalog_is_empty() {
        let engine =
            RecommendationEngine::from_file(Path::new("/nonexistent/profiles.toml"), ScoringWeights::default())
                .unwrap();
        assert!(engine.profiles().is_empty());
    }

    #[test]
    fn malformed_catalog_is_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[[profiles]]\ntags = 3").unwrap();
        assert!(RecommendationEngine::from_file(f.path(), ScoringWeights::default()).is_err());
    }
}
