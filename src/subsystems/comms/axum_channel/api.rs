//! Axum handlers for `/api/*` routes.
//!
//! Each handler receives [`AxumState`] via [`axum::extract::State`] and
//! returns an axum [`Response`]. Errors share one body shape:
//! `{"error": <code>, "message": <text>}`.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::subsystems::agents::{ChatError, RefineError, new_conversation_id};
use crate::subsystems::memory::{Role, Turn};
use crate::subsystems::routing::{detect_task_type, suggestion};

use super::AxumState;

/// Upper bound for one chat turn (decision + search + generation).
const TURN_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SUMMARY_WORDS: usize = 200;
const DEFAULT_USER: &str = "anonymous";

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct MessageRequest {
    message: String,
    provider: Option<String>,
    user_id: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct AdviceRequest {
    message: String,
    provider: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct PromptRequest {
    prompt: String,
    provider: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct SummaryMessage {
    role: Role,
    text: String,
}

#[derive(Deserialize)]
pub(super) struct SummarizeRequest {
    #[serde(default)]
    messages: Vec<SummaryMessage>,
    limit: Option<usize>,
    provider: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct ProvidersQuery {
    #[serde(default)]
    probe: bool,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn chat_error_response(e: &ChatError) -> Response {
    let (status, code) = match e {
        ChatError::EmptyPrompt | ChatError::InvalidConversation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        ChatError::ProviderUnavailable(_) => (StatusCode::BAD_REQUEST, "provider_unavailable"),
        ChatError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
        ChatError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
    };
    (status, json_error(code, e.user_message())).into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/status
pub(super) async fn status(State(state): State<AxumState>) -> Response {
    let o = &state.app.orchestrator;
    let body = json!({
        "name": state.app.config.name,
        "default_provider": o.registry().default_provider(),
        "providers": o.registry().status(),
        "search_enabled": o.search().is_configured(),
        "profiles": o.engine().profiles().len(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /api/providers. `?probe=true` also pings every available provider.
pub(super) async fn providers(
    State(state): State<AxumState>,
    Query(query): Query<ProvidersQuery>,
) -> Response {
    let registry = state.app.orchestrator.registry();
    let mut body = json!({ "providers": registry.status() });
    if query.probe {
        let reachable: serde_json::Map<String, serde_json::Value> = registry
            .probe()
            .await
            .into_iter()
            .map(|(id, ok)| (id, json!(ok)))
            .collect();
        body["reachable"] = serde_json::Value::Object(reachable);
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /api/conversations
pub(super) async fn new_conversation() -> Response {
    (StatusCode::CREATED, Json(json!({ "conversation_id": new_conversation_id() }))).into_response()
}

/// POST /api/conversations/{id}/advice
pub(super) async fn advice(
    State(state): State<AxumState>,
    Path(id): Path<String>,
    Json(req): Json<AdviceRequest>,
) -> Response {
    let o = &state.app.orchestrator;
    let current = req.provider.unwrap_or_else(|| o.registry().default_provider().to_string());
    let advice = o.advise(&id, &req.message, &current).await;
    (StatusCode::OK, Json(json!({ "advice": advice }))).into_response()
}

/// POST /api/conversations/{id}/messages
pub(super) async fn message(
    State(state): State<AxumState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Response {
    let user_id = req.user_id.as_deref().unwrap_or(DEFAULT_USER);
    let turn = state.app.orchestrator.handle_user_message(&id, user_id, &req.message, req.provider.as_deref());

    match tokio::time::timeout(TURN_TIMEOUT, turn).await {
        Ok(Ok(outcome)) => {
            let mut body = json!(outcome);
            body["conversation_id"] = json!(id);
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(e)) => {
            warn!(channel_id = %state.channel_id, conversation_id = %id, error = %e, "turn failed");
            chat_error_response(&e)
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            json_error("timeout", "the AI provider took too long to answer"),
        )
            .into_response(),
    }
}

/// GET /api/conversations/{id}/memory
pub(super) async fn memory(State(state): State<AxumState>, Path(id): Path<String>) -> Response {
    match state.app.orchestrator.memory().snapshot(&id).await {
        Ok(Some(memory)) => (StatusCode::OK, Json(json!(memory))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, json_error("not_found", "no memory for this conversation"))
            .into_response(),
        Err(e) => {
            warn!(channel_id = %state.channel_id, conversation_id = %id, error = %e, "memory read failed");
            (StatusCode::BAD_REQUEST, json_error("bad_request", e)).into_response()
        }
    }
}

/// POST /api/suggest-provider
pub(super) async fn suggest_provider(
    State(state): State<AxumState>,
    Json(req): Json<PromptRequest>,
) -> Response {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return (StatusCode::BAD_REQUEST, json_error("bad_request", "prompt is required")).into_response();
    }
    let rec = state.app.orchestrator.engine().recommend(prompt);
    let task = detect_task_type(prompt);
    let body = json!({
        "provider": rec.provider_id,
        "reason": rec.reason,
        "source": rec.source,
        "task_type": task,
        "task_suggestion": suggestion(task).provider_id,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// POST /api/refine-prompt
pub(super) async fn refine_prompt(
    State(state): State<AxumState>,
    Json(req): Json<PromptRequest>,
) -> Response {
    match state.app.refiner.refine(&req.prompt, req.provider.as_deref()).await {
        Ok(refined) => (StatusCode::OK, Json(json!(refined))).into_response(),
        Err(e) => {
            let status = match e {
                RefineError::EmptyPrompt | RefineError::TooLong { .. } => StatusCode::BAD_REQUEST,
                RefineError::NoProviders => StatusCode::SERVICE_UNAVAILABLE,
                RefineError::Exhausted(_) => StatusCode::BAD_GATEWAY,
            };
            warn!(channel_id = %state.channel_id, error = %e, "refine failed");
            (status, json_error("refine_failed", e)).into_response()
        }
    }
}

/// POST /api/summarize
pub(super) async fn summarize(
    State(state): State<AxumState>,
    Json(req): Json<SummarizeRequest>,
) -> Response {
    if req.messages.is_empty() {
        return (StatusCode::BAD_REQUEST, json_error("bad_request", "messages must be a non-empty list"))
            .into_response();
    }
    let limit = req.limit.unwrap_or(DEFAULT_SUMMARY_WORDS);
    let turns: Vec<Turn> = req.messages.into_iter().map(|m| Turn::new(m.role, m.text)).collect();

    let base = state.app.orchestrator.memory().summarizer();
    let summarizer = match req.provider.as_deref() {
        Some(p) => base.with_preferred(p),
        None => base.clone(),
    };
    match summarizer.summarize(&turns, limit).await {
        Some(summary) => (
            StatusCode::OK,
            Json(json!({ "summary": summary, "messages_processed": turns.len(), "limit": limit })),
        )
            .into_response(),
        None => (StatusCode::BAD_GATEWAY, json_error("summary_failed", "could not summarize the messages"))
            .into_response(),
    }
}
