//! Anthropic Messages API provider (`/v1/messages`).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::llm::{GenerateOptions, LlmResponse, ProviderError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
        timeout_seconds: u64,
        api_key: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_base_url, model, temperature, max_tokens, api_key })
    }

    pub async fn ping(&self) -> Result<(), ProviderError> {
        super::head_probe(&self.api_base_url).await
    }

    pub async fn complete(
        &self,
        content: &str,
        options: &GenerateOptions,
    ) -> Result<LlmResponse, ProviderError> {
        let payload = MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
            system: options.system.as_deref(),
            messages: vec![Message { role: "user", content }],
        };

        debug!(model = %self.model, content_len = content.len(), "sending Anthropic request");

        let response = self
            .client
            .post(&self.api_base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.api_base_url, error = %e, "Anthropic request failed (transport)");
                ProviderError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(env) => format!("HTTP {status} [{}]: {}", env.error.kind, env.error.message),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            error!(%status, %message, "Anthropic request returned HTTP error");
            return Err(ProviderError::Request(message));
        }

        let parsed = response.json::<MessagesResponse>().await.map_err(|e| {
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        let text: String = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(ProviderError::Request("empty or missing content in response".into()));
        }

        Ok(LlmResponse {
            text: text.to_string(),
            truncated: parsed.stop_reason.as_deref() == Some("max_tokens"),
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::new(
            format!("{}/v1/messages", server.uri()),
            "claude-test".into(),
            0.2,
            4500,
            5,
            "ak-test".into(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sends_headers_and_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-test",
                "max_tokens": 4500,
                "system": "structured",
                "messages": [{"role": "user", "content": "write"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Part one. "}, {"type": "text", "text": "Part two."}],
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let opts = GenerateOptions { system: Some("structured".into()), ..Default::default() };
        let r = provider(&server).complete("write", &opts).await.unwrap();
        assert_eq!(r.text, "Part one. Part two.");
        assert!(!r.truncated);
    }

    #[tokio::test]
    async fn max_tokens_stop_reason_marks_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "cut"}],
                "stop_reason": "max_tokens"
            })))
            .mount(&server)
            .await;

        let r = provider(&server).complete("x", &GenerateOptions::default()).await.unwrap();
        assert!(r.truncated);
    }

    #[tokio::test]
    async fn error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).complete("x", &GenerateOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
    }
}
