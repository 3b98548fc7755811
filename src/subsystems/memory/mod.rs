//! Conversation memory.
//!
//! [`MemoryManager`] keeps, per conversation, the last `window_size` turns
//! verbatim plus an LLM-generated summary of everything older, and renders
//! both into a context block that is prepended to the next prompt.
//!
//! Storage is pluggable ([`MemoryBackend`]): in-process for tests and
//! single-node runs, JSON files for persistence across restarts. All backend
//! I/O runs on `spawn_blocking`.

pub mod store;
pub mod stores;
pub mod summarizer;
pub mod sweeper;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::AppError;

pub use store::{MemoryBackend, TranscriptStore};
pub use summarizer::Summarizer;
pub use types::{ConversationMemory, MemoryBackendKind, RegenerationPolicy, Role, Turn};

/// Header of every context block.
pub const CONTEXT_HEADER: &str = "PREVIOUS CONVERSATION CONTEXT:";
pub const OLDER_SUMMARY_LABEL: &str = "SUMMARY OF EARLIER INTERACTIONS:";
pub const RECENT_SUMMARY_LABEL: &str = "SUMMARY OF LATEST INTERACTIONS:";
/// Last line of a context block; the user's message follows it.
pub const NEW_MESSAGE_MARKER: &str = "NEW USER MESSAGE:";

/// Tunables for [`MemoryManager`].
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub window_size: usize,
    pub max_conversations: usize,
    pub old_summary_words: usize,
    pub recent_summary_words: usize,
    pub regenerate_on: RegenerationPolicy,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            window_size: 8,
            max_conversations: 10,
            old_summary_words: 150,
            recent_summary_words: 200,
            regenerate_on: RegenerationPolicy::default(),
        }
    }
}

impl From<&MemoryConfig> for MemorySettings {
    fn from(c: &MemoryConfig) -> Self {
        Self {
            window_size: c.window_size,
            max_conversations: c.max_conversations,
            old_summary_words: c.old_summary_words,
            recent_summary_words: c.recent_summary_words,
            regenerate_on: c.regenerate_on,
        }
    }
}

/// Result of [`MemoryManager::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Fewer than two turns; nothing stored.
    Skipped,
    /// The snapshot had fewer turns than already recorded; ignored.
    Stale,
    Updated {
        /// The older-turn summary was regenerated during this update.
        summarized: bool,
    },
}

// ── Keyed locks ───────────────────────────────────────────────────────────────

/// Map of per-key async mutexes. The map itself is only held for the
/// lookup; the returned lock is what callers await on.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(key.to_string()).or_default())
    }

    /// Acquire the lock for `key`. The entry is pruned when the returned
    /// guard drops and nobody else is waiting on it, so the map only holds
    /// keys with work in flight.
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let guard = self.get(key).lock_owned().await;
        KeyedGuard { locks: self, key: key.to_string(), guard: Some(guard) }
    }

    /// Drop the lock for `key` unless someone still holds a reference to it.
    pub fn prune(&self, key: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held lock from [`KeyedLocks::lock`].
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the only reference again.
        drop(self.guard.take());
        self.locks.prune(&self.key);
    }
}

// ── MemoryManager ─────────────────────────────────────────────────────────────

pub struct MemoryManager {
    backend: Arc<dyn MemoryBackend>,
    summarizer: Summarizer,
    settings: MemorySettings,
    locks: KeyedLocks,
    /// Conversation that most recently had a turn; never evicted.
    active: Mutex<Option<String>>,
}

impl MemoryManager {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        summarizer: Summarizer,
        settings: MemorySettings,
    ) -> Self {
        info!(
            backend = backend.backend_type(),
            window = settings.window_size,
            max_conversations = settings.max_conversations,
            "memory manager ready"
        );
        Self { backend, summarizer, settings, locks: KeyedLocks::new(), active: Mutex::new(None) }
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    pub fn mark_active(&self, conversation_id: &str) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(conversation_id.to_string());
    }

    pub fn active(&self) -> Option<String> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&dyn MemoryBackend) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| AppError::Memory(format!("memory task failed: {e}")))?
    }

    /// Current memory for a conversation, if any.
    pub async fn snapshot(&self, conversation_id: &str) -> Result<Option<ConversationMemory>, AppError> {
        let id = conversation_id.to_string();
        self.blocking(move |b| b.load(&id)).await
    }

    /// Fold the full transcript `turns` into the conversation's memory.
    ///
    /// Fewer than two turns is a no-op. Beyond the window, everything but the
    /// last `window_size` turns is summarized; the summary is only regenerated
    /// when the older set's fingerprint changed or no summary exists yet. A
    /// failed summarization keeps the previous summary and leaves the
    /// fingerprint untouched so the next update retries.
    pub async fn update(&self, conversation_id: &str, turns: &[Turn]) -> Result<UpdateOutcome, AppError> {
        if turns.len() < 2 {
            debug!(conversation_id, turns = turns.len(), "memory update skipped");
            return Ok(UpdateOutcome::Skipped);
        }

        let _guard = self.locks.lock(conversation_id).await;

        let existing = self.snapshot(conversation_id).await?;
        if let Some(e) = &existing {
            if e.total_turn_count > turns.len() {
                warn!(
                    conversation_id,
                    recorded = e.total_turn_count,
                    submitted = turns.len(),
                    "stale memory update ignored"
                );
                return Ok(UpdateOutcome::Stale);
            }
        }

        let mut memory = existing.unwrap_or_else(|| ConversationMemory::new(conversation_id));
        memory.total_turn_count = turns.len();
        let window = self.settings.window_size;
        let mut summarized = false;

        if turns.len() > window {
            let split = turns.len() - window;
            let (older, recent) = turns.split_at(split);
            let fingerprint = self.settings.regenerate_on.fingerprint(older);
            let stale = memory.old_summary.is_none()
                || memory.older_fingerprint.as_deref() != Some(fingerprint.as_str());

            if stale {
                debug!(conversation_id, older = older.len(), "regenerating older summary");
                match self.summarizer.summarize(older, self.settings.old_summary_words).await {
                    Some(summary) => {
                        memory.old_summary = Some(summary);
                        memory.older_fingerprint = Some(fingerprint);
                        summarized = true;
                    }
                    None => warn!(conversation_id, "older summary not regenerated"),
                }
            }
            memory.recent_turns = recent.to_vec();
        } else {
            memory.recent_turns = turns.to_vec();
            memory.old_summary = None;
            memory.older_fingerprint = None;
        }
        memory.updated_at = types::now_rfc3339();

        let has_summary = memory.old_summary.is_some();
        let recent = memory.recent_turns.len();
        self.blocking(move |b| b.save(&memory)).await?;

        info!(
            conversation_id,
            total = turns.len(),
            recent,
            has_summary,
            summarized,
            "memory updated"
        );
        Ok(UpdateOutcome::Updated { summarized })
    }

    /// Render the context block for the next prompt, or `None` when fewer
    /// than two turns are recorded.
    pub async fn context(&self, conversation_id: &str) -> Result<Option<String>, AppError> {
        let Some(memory) = self.snapshot(conversation_id).await? else {
            return Ok(None);
        };
        if memory.total_turn_count < 2 {
            return Ok(None);
        }

        let mut ctx = format!("{CONTEXT_HEADER}\n\n");
        if let Some(old) = &memory.old_summary {
            ctx.push_str(&format!("{OLDER_SUMMARY_LABEL}\n{old}\n\n"));
        }
        if memory.recent_turns.len() > 1 {
            match self
                .summarizer
                .summarize(&memory.recent_turns, self.settings.recent_summary_words)
                .await
            {
                Some(recent) => ctx.push_str(&format!("{RECENT_SUMMARY_LABEL}\n{recent}\n\n")),
                None => warn!(conversation_id, "recent summary omitted from context"),
            }
        }
        ctx.push_str(NEW_MESSAGE_MARKER);
        ctx.push('\n');
        Ok(Some(ctx))
    }

    /// Keep at most `max_conversations` memories, newest ids first. The
    /// active conversation is never removed. Returns the evicted ids.
    pub async fn evict_stale(&self, active: Option<&str>) -> Result<Vec<String>, AppError> {
        let max = self.settings.max_conversations;
        let active = active.map(str::to_string);
        let evicted = self
            .blocking(move |b| {
                let mut ids = b.ids()?;
                if ids.len() <= max {
                    return Ok(Vec::new());
                }
                ids.sort_unstable_by(|a, b| b.cmp(a));
                let mut evicted = Vec::new();
                for id in ids.into_iter().skip(max) {
                    if active.as_deref() == Some(id.as_str()) {
                        continue;
                    }
                    if b.remove(&id)? {
                        evicted.push(id);
                    }
                }
                Ok(evicted)
            })
            .await?;

        for id in &evicted {
            self.locks.prune(id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), ?evicted, "evicted stale conversation memories");
        }
        Ok(evicted)
    }
}
