//! Live web search.
//!
//! [`WebSearch`] is a Serper (`google.serper.dev`) client whose
//! [`query`](WebSearch::query) never fails: a missing key, timeout, HTTP
//! error or malformed body all come back as `None` (each logged), and the
//! caller degrades to answering without web access.
//!
//! [`decision`] holds the classification protocol that decides whether a
//! turn needs a search at all.

pub mod decision;

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::AppError;

pub use decision::{SearchDecider, SearchDecision, SearchTag};

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub organic: Vec<SearchHit>,
}

/// Why a search produced nothing. Logged, never returned to callers.
#[derive(Debug, Error)]
enum SearchError {
    #[error("search API key not configured")]
    NotConfigured,
    #[error("search timed out")]
    Timeout,
    #[error("search request failed: {0}")]
    Request(String),
    #[error("malformed search response: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    hl: &'a str,
    gl: &'a str,
}

#[derive(Debug, Clone)]
pub struct WebSearch {
    client: Client,
    endpoint: String,
    num_results: usize,
    hl: String,
    gl: String,
    api_key: Option<String>,
}

impl WebSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build search client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            num_results: config.num_results,
            hl: config.hl.clone(),
            gl: config.gl.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Results requested per query; also the number rendered into prompts.
    pub fn num_results(&self) -> usize {
        self.num_results
    }

    /// Run a search. Returns `None` on any failure.
    pub async fn query(&self, q: &str) -> Option<SearchResults> {
        match self.try_query(q).await {
            Ok(results) => {
                info!(query = %q, results = results.organic.len(), "web search done");
                Some(results)
            }
            Err(e) => {
                warn!(query = %q, error = %e, "web search unavailable");
                None
            }
        }
    }

    async fn try_query(&self, q: &str) -> Result<SearchResults, SearchError> {
        let key = self.api_key.as_deref().ok_or(SearchError::NotConfigured)?;
        debug!(query = %q, endpoint = %self.endpoint, "sending web search");

        let body = SerperRequest { q, num: self.num_results, hl: &self.hl, gl: &self.gl };
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else {
                    SearchError::Request(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Request(format!("HTTP {status}")));
        }

        response
            .json::<SearchResults>()
            .await
            .map_err(|e| SearchError::Malformed(e.without_url().to_string()))
    }
}

/// Render the top `limit` results as a context block for the final prompt.
/// Returns `None` when there is nothing to show.
pub fn format_search_context(
    results: &SearchResults,
    question: &str,
    today: NaiveDate,
    limit: usize,
) -> Option<String> {
    if results.organic.is_empty() {
        return None;
    }

    let hits = results
        .organic
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, hit)| {
            format!("{}. **{}**\n   {}\n   *Source: {}*", i + 1, hit.title, hit.snippet, hit.link)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(format!(
        "**SEARCH CONTEXT** - {date}\n\n\
         **Relevant information for: \"{question}\"**\n\n\
         {hits}\n\n\
         **Instructions:** Use this up-to-date information as the basis for your answer. Cite sources when relevant.",
        date = today.format("%A, %-d %B %Y"),
    ))
}
