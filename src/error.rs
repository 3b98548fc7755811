//! Application-wide error types.
//!
//! Per-call failures that callers must branch on live next to their module:
//! [`crate::llm::ProviderError`] for provider calls and
//! [`crate::subsystems::agents::ChatError`] for a whole user turn.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
