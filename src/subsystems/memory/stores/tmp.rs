//! `tmp` store: ephemeral in-process memory and transcripts.
//!
//! Everything is discarded when the process exits. Used by default and in
//! every test that does not care about files. Transcripts are capped by turn
//! count like the Markdown store, and removing a conversation's memory drops
//! its transcript too, so eviction bounds the whole store.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppError;
use super::super::store::{MemoryBackend, TranscriptStore};
use super::super::types::{ConversationMemory, Turn};
use super::transcript::DEFAULT_TRANSCRIPT_CAP;

pub struct TmpStore {
    memories: Mutex<HashMap<String, ConversationMemory>>,
    transcripts: Mutex<HashMap<String, Vec<Turn>>>,
    transcript_cap: usize,
}

impl Default for TmpStore {
    fn default() -> Self {
        Self {
            memories: Mutex::default(),
            transcripts: Mutex::default(),
            transcript_cap: DEFAULT_TRANSCRIPT_CAP,
        }
    }
}

impl TmpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `cap` turns per transcript, oldest dropped first.
    pub fn with_transcript_cap(mut self, cap: Option<usize>) -> Self {
        self.transcript_cap = cap.unwrap_or(DEFAULT_TRANSCRIPT_CAP).max(2);
        self
    }
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Memory("tmp store lock poisoned".into())
}

impl MemoryBackend for TmpStore {
    fn backend_type(&self) -> &str {
        "tmp"
    }

    fn load(&self, conversation_id: &str) -> Result<Option<ConversationMemory>, AppError> {
        let map = self.memories.lock().map_err(poisoned)?;
        Ok(map.get(conversation_id).cloned())
    }

    fn save(&self, memory: &ConversationMemory) -> Result<(), AppError> {
        let mut map = self.memories.lock().map_err(poisoned)?;
        map.insert(memory.conversation_id.clone(), memory.clone());
        Ok(())
    }

    fn remove(&self, conversation_id: &str) -> Result<bool, AppError> {
        let removed = self.memories.lock().map_err(poisoned)?.remove(conversation_id).is_some();
        self.transcripts.lock().map_err(poisoned)?.remove(conversation_id);
        Ok(removed)
    }

    fn ids(&self) -> Result<Vec<String>, AppError> {
        let map = self.memories.lock().map_err(poisoned)?;
        Ok(map.keys().cloned().collect())
    }
}

impl TranscriptStore for TmpStore {
    fn store_type(&self) -> &str {
        "tmp"
    }

    fn append(&self, conversation_id: &str, turn: &Turn) -> Result<(), AppError> {
        let mut map = self.transcripts.lock().map_err(poisoned)?;
        let turns = map.entry(conversation_id.to_string()).or_default();
        turns.push(turn.clone());
        if turns.len() > self.transcript_cap {
            let excess = turns.len() - self.transcript_cap;
            turns.drain(..excess);
        }
        Ok(())
    }

    fn read_all(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError> {
        let map = self.transcripts.lock().map_err(poisoned)?;
        Ok(map.get(conversation_id).cloned().unwrap_or_default())
    }

    fn remove(&self, conversation_id: &str) -> Result<bool, AppError> {
        let mut map = self.transcripts.lock().map_err(poisoned)?;
        Ok(map.remove(conversation_id).is_some())
    }
}
