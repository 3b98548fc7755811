//! Conversation memory data types.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Speaker label used when a conversation is rendered for summarization.
    pub fn speaker(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "AI",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(AppError::Memory(format!("unknown turn role: '{other}'"))),
        }
    }
}

/// One message in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into(), timestamp: now_rfc3339() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Rolling memory of one conversation: a compressed summary of everything
/// older than the window plus the window itself, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub conversation_id: String,
    pub old_summary: Option<String>,
    /// Newest last. Never longer than the configured window.
    pub recent_turns: Vec<Turn>,
    pub total_turn_count: usize,
    /// Identifies the older-turn set `old_summary` was generated from.
    #[serde(default)]
    pub older_fingerprint: Option<String>,
    pub updated_at: String,
}

impl ConversationMemory {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            old_summary: None,
            recent_turns: Vec::new(),
            total_turn_count: 0,
            older_fingerprint: None,
            updated_at: now_rfc3339(),
        }
    }
}

/// What decides whether the older-turn summary must be regenerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegenerationPolicy {
    /// Regenerate when the number of older turns changes.
    Count,
    /// Regenerate when the older turns' content changes.
    #[default]
    Content,
}

impl RegenerationPolicy {
    pub fn fingerprint(self, older: &[Turn]) -> String {
        match self {
            RegenerationPolicy::Count => format!("count:{}", older.len()),
            RegenerationPolicy::Content => {
                let mut hasher = Sha256::new();
                for turn in older {
                    hasher.update(turn.role.as_str().as_bytes());
                    hasher.update([0u8]);
                    hasher.update(turn.text.as_bytes());
                    hasher.update([0u8]);
                }
                format!("sha256:{}", hex::encode(hasher.finalize()))
            }
        }
    }
}

/// Which backend holds conversation memories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackendKind {
    #[default]
    Tmp,
    Json,
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn turn_timestamp_is_utc() {
        let t = Turn::user("hi");
        assert!(t.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&t.timestamp).is_ok());
    }

    #[test]
    fn count_fingerprint_ignores_content() {
        let a = vec![Turn::user("a"), Turn::assistant("b")];
        let b = vec![Turn::user("x"), Turn::assistant("y")];
        let p = RegenerationPolicy::Count;
        assert_eq!(p.fingerprint(&a), p.fingerprint(&b));
    }

    #[test]
    fn content_fingerprint_tracks_edits() {
        let a = vec![Turn::user("a"), Turn::assistant("b")];
        let mut edited = a.clone();
        edited[1].text = "b (edited)".into();
        let p = RegenerationPolicy::Content;
        assert_ne!(p.fingerprint(&a), p.fingerprint(&edited));
        // Timestamps do not participate.
        let mut retimed = a.clone();
        retimed[0].timestamp = "2000-01-01T00:00:00Z".into();
        assert_eq!(p.fingerprint(&a), p.fingerprint(&retimed));
    }

    #[test]
    fn memory_json_shape() {
        let m = ConversationMemory::new("c1");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["conversation_id"], "c1");
        assert!(v["old_summary"].is_null());
    }
}
