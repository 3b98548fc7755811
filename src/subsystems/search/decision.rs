//! Search-necessity classification.
//!
//! The provider is asked, at temperature 0, to answer with one tag on its own
//! line (`#NO_SEARCH`, `#MAYBE_SEARCH` or `#NEEDS_SEARCH`), an optional
//! `SEARCH_QUERY: ...` line and at most two lines of justification. Anything
//! that does not match, including a failed call, is read as `#MAYBE_SEARCH`.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::llm::ProviderRegistry;
use crate::subsystems::agents::prompt::PromptBuilder;

const TEMPLATE_FILE: &str = "search_decision.txt";

/// Tokens taken from the prompt when the model gives no query.
pub const FALLBACK_QUERY_WORDS: usize = 6;

const FALLBACK_TEMPLATE: &str = "\
Analyze the user question below and decide whether an external web search is needed.
CURRENT DATE: {{today}} (use this date when building queries; when relevant include month and year, e.g. \"{{month_year}}\").
The output MUST start with the TAG in uppercase on its own line, one of:
#NO_SEARCH
#MAYBE_SEARCH
#NEEDS_SEARCH

If the decision is #MAYBE_SEARCH or #NEEDS_SEARCH, put a short search query on the next line starting with: SEARCH_QUERY: <your concise query>
IMPORTANT: a SEARCH_QUERY must carry a current time reference (month and year, or the date), for example \"bitcoin price {{month_year}}\".
After the tag and the SEARCH_QUERY (if any) you may add a brief justification of at most 2 lines.

Valid output example:
#NO_SEARCH
Reason: I can answer from internal knowledge.

or

#NEEDS_SEARCH
SEARCH_QUERY: bitcoin price {{month_year}}
Reason: needs current market data.

Answer only in the format above. Do NOT include anything else. Use the CURRENT DATE given above when building the SEARCH_QUERY.";

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#(NO_SEARCH|MAYBE_SEARCH|NEEDS_SEARCH)").expect("decision tag regex")
});

static QUERY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)SEARCH_QUERY:[ \t]*(.+)").expect("search query regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchTag {
    NoSearch,
    MaybeSearch,
    NeedsSearch,
}

impl SearchTag {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::NoSearch => "#NO_SEARCH",
            Self::MaybeSearch => "#MAYBE_SEARCH",
            Self::NeedsSearch => "#NEEDS_SEARCH",
        }
    }

    pub fn wants_search(self) -> bool {
        !matches!(self, Self::NoSearch)
    }

    fn from_token(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "NO_SEARCH" => Self::NoSearch,
            "NEEDS_SEARCH" => Self::NeedsSearch,
            _ => Self::MaybeSearch,
        }
    }
}

impl fmt::Display for SearchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchDecision {
    pub tag: SearchTag,
    /// Always `Some` for search tags, always `None` for `NoSearch`.
    pub query: Option<String>,
}

/// First [`FALLBACK_QUERY_WORDS`] whitespace-separated tokens of `prompt`.
pub fn fallback_query(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .take(FALLBACK_QUERY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a raw classification reply. `raw` is `None` when the call failed.
/// `prompt` is the user's own text, used for the fallback query.
pub fn parse_decision(raw: Option<&str>, prompt: &str) -> SearchDecision {
    let raw = raw.unwrap_or_default();

    let tag = match TAG.captures(raw) {
        Some(caps) => SearchTag::from_token(&caps[1]),
        None => {
            warn!("no decision tag in classifier reply; assuming #MAYBE_SEARCH");
            SearchTag::MaybeSearch
        }
    };

    if !tag.wants_search() {
        return SearchDecision { tag, query: None };
    }

    let query = QUERY_LINE
        .captures(raw)
        .map(|caps| caps[1].trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| fallback_query(prompt));

    SearchDecision { tag, query: Some(query) }
}

/// Asks a provider whether a prompt needs a live web search.
#[derive(Clone)]
pub struct SearchDecider {
    registry: Arc<ProviderRegistry>,
    prompts_dir: PathBuf,
}

impl SearchDecider {
    pub fn new(registry: Arc<ProviderRegistry>, prompts_dir: PathBuf) -> Self {
        Self { registry, prompts_dir }
    }

    /// The full classification prompt for `question` as of `today`.
    pub fn build_prompt(&self, question: &str, today: NaiveDate) -> String {
        PromptBuilder::new(&self.prompts_dir)
            .layer_or(TEMPLATE_FILE, FALLBACK_TEMPLATE)
            .append("User question:\n{{question}}")
            .var("today", today.format("%d/%m/%Y").to_string())
            .var("month_year", today.format("%B %Y").to_string())
            .var("question", question)
            .build()
    }

    /// Classify `prompt_for_decision` (memory context plus the user's text)
    /// with `provider`. Never fails.
    pub async fn decide(
        &self,
        prompt_for_decision: &str,
        raw_prompt: &str,
        provider: &str,
        today: NaiveDate,
    ) -> SearchDecision {
        let prompt = self.build_prompt(prompt_for_decision, today);
        let raw = match self.registry.classify(provider, &prompt).await {
            Ok(reply) => {
                if tracing::enabled!(tracing::Level::TRACE) {
                    trace!(provider = %provider, reply = %reply.text, "classifier reply");
                }
                Some(reply.text)
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "search decision call failed");
                None
            }
        };

        let decision = parse_decision(raw.as_deref(), raw_prompt);
        debug!(
            provider = %provider,
            tag = %decision.tag,
            query = decision.query.as_deref().unwrap_or(""),
            "search decision"
        );
        decision
    }
}
