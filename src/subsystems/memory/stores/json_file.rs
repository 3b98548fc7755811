//! `json` backend: one pretty-printed JSON file per conversation.
//!
//! Files live at `{dir}/{conversation_id}.json`. Writes go to a sibling
//! `.tmp` file first and are renamed into place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use super::super::store::{MemoryBackend, validate_conversation_id};
use super::super::types::ConversationMemory;

const EXTENSION: &str = "json";

pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Create the backend, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, conversation_id: &str) -> Result<PathBuf, AppError> {
        validate_conversation_id(conversation_id)?;
        Ok(self.dir.join(format!("{conversation_id}.{EXTENSION}")))
    }
}

fn read_memory(path: &Path) -> Result<Option<ConversationMemory>, AppError> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(AppError::Memory(format!("cannot read {}: {e}", path.display())));
        }
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| AppError::Memory(format!("malformed {}: {e}", path.display())))
}

impl MemoryBackend for JsonFileBackend {
    fn backend_type(&self) -> &str {
        "json"
    }

    fn load(&self, conversation_id: &str) -> Result<Option<ConversationMemory>, AppError> {
        read_memory(&self.path_for(conversation_id)?)
    }

    fn save(&self, memory: &ConversationMemory) -> Result<(), AppError> {
        let path = self.path_for(&memory.conversation_id)?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(memory)
            .map_err(|e| AppError::Memory(format!("serialise memory: {e}")))?;
        fs::write(&tmp, data)
            .map_err(|e| AppError::Memory(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| AppError::Memory(format!("cannot replace {}: {e}", path.display())))
    }

    fn remove(&self, conversation_id: &str) -> Result<bool, AppError> {
        let path = self.path_for(conversation_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Memory(format!("cannot remove {}: {e}", path.display()))),
        }
    }

    fn ids(&self) -> Result<Vec<String>, AppError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| AppError::Memory(format!("cannot list {}: {e}", self.dir.display())))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::memory::types::Turn;
    use tempfile::TempDir;

    fn setup() -> (TempDir, JsonFileBackend) {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("memory")).unwrap();
        (dir, backend)
    }

    #[test]
    fn save_then_load() {
        let (_dir, backend) = setup();
        let mut m = ConversationMemory::new("conv-1");
        m.recent_turns = vec![Turn::user("hi"), Turn::assistant("hello")];
        m.total_turn_count = 2;
        backend.save(&m).unwrap();

        assert_eq!(backend.load("conv-1").unwrap(), Some(m));
        assert!(backend.load("conv-2").unwrap().is_none());
    }

    #[test]
    fn ids_lists_only_json_files() {
        let (dir, backend) = setup();
        backend.save(&ConversationMemory::new("a")).unwrap();
        backend.save(&ConversationMemory::new("b")).unwrap();
        fs::write(dir.path().join("memory/notes.txt"), "x").unwrap();

        let mut ids = backend.ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn remove_reports_presence() {
        let (_dir, backend) = setup();
        backend.save(&ConversationMemory::new("a")).unwrap();
        assert!(backend.remove("a").unwrap());
        assert!(!backend.remove("a").unwrap());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let (dir, backend) = setup();
        fs::write(dir.path().join("memory/bad.json"), "{not json").unwrap();
        assert!(backend.load("bad").is_err());
    }

    #[test]
    fn traversal_ids_are_rejected() {
        let (_dir, backend) = setup();
        assert!(backend.load("../secrets").is_err());
    }
}
