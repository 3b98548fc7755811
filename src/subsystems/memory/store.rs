//! Storage traits for conversation memory and transcripts.
//!
//! Backends are `Send + Sync` and do blocking I/O. [`MemoryManager`] and the
//! orchestrator call them through `spawn_blocking`.
//!
//! [`MemoryManager`]: super::MemoryManager

use crate::error::AppError;

use super::types::{ConversationMemory, Turn};

/// Keyed store of [`ConversationMemory`] values.
pub trait MemoryBackend: Send + Sync {
    /// Unique type name for this backend (e.g. `"tmp"`).
    fn backend_type(&self) -> &str;

    fn load(&self, conversation_id: &str) -> Result<Option<ConversationMemory>, AppError>;

    fn save(&self, memory: &ConversationMemory) -> Result<(), AppError>;

    /// Returns `true` if something was removed.
    fn remove(&self, conversation_id: &str) -> Result<bool, AppError>;

    /// All stored conversation ids, in no particular order.
    fn ids(&self) -> Result<Vec<String>, AppError>;
}

/// Append-only per-conversation turn log.
pub trait TranscriptStore: Send + Sync {
    fn store_type(&self) -> &str;

    fn append(&self, conversation_id: &str, turn: &Turn) -> Result<(), AppError>;

    /// Every retained turn, oldest first. Unknown ids yield an empty list.
    fn read_all(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError>;

    fn remove(&self, _conversation_id: &str) -> Result<bool, AppError> {
        Err(AppError::Memory(format!(
            "store '{}' does not support remove",
            self.store_type()
        )))
    }
}

/// Conversation ids become file names; only accept the characters a UUID or
/// simple slug can contain.
pub fn validate_conversation_id(id: &str) -> Result<(), AppError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(AppError::Memory(format!("invalid conversation id: '{id}'")))
    }
}
