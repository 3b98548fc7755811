//! Axum-based HTTP channel, serving the chat core under `/api/`.
//!
//! Implements [`Component`] so it runs beside the memory sweeper: `run()`
//! drives the axum event loop and the shared [`CancellationToken`] is wired
//! to axum's graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET  /api/status
//! GET  /api/providers[?probe=true]
//! POST /api/conversations
//! POST /api/conversations/{id}/advice
//! POST /api/conversations/{id}/messages
//! GET  /api/conversations/{id}/memory
//! POST /api/suggest-provider
//! POST /api/refine-prompt
//! POST /api/summarize
//! ```

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::App;
use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AxumState {
    /// Channel identifier used in log fields.
    pub channel_id: Arc<str>,
    pub app: Arc<App>,
}

// ── AxumChannel ───────────────────────────────────────────────────────────────

pub struct AxumChannel {
    channel_id: String,
    bind_addr: String,
    app: Arc<App>,
}

impl AxumChannel {
    pub fn new(channel_id: impl Into<String>, bind_addr: impl Into<String>, app: Arc<App>) -> Self {
        Self { channel_id: channel_id.into(), bind_addr: bind_addr.into(), app }
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(self.channel_id, self.bind_addr, self.app, shutdown))
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

async fn run_axum(
    channel_id: String,
    bind_addr: String,
    app: Arc<App>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(AxumState { channel_id: Arc::from(channel_id.as_str()), app });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("axum bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "axum channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("axum server error: {e}")))?;

    info!(%channel_id, "axum channel shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub(crate) fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/api/status",                          get(api::status))
        .route("/api/providers",                       get(api::providers))
        .route("/api/conversations",                   post(api::new_conversation))
        .route("/api/conversations/{id}/advice",       post(api::advice))
        .route("/api/conversations/{id}/messages",     post(api::message))
        .route("/api/conversations/{id}/memory",       get(api::memory))
        .route("/api/suggest-provider",                post(api::suggest_provider))
        .route("/api/refine-prompt",                   post(api::refine_prompt))
        .route("/api/summarize",                       post(api::summarize))
        .with_state(state)
}
