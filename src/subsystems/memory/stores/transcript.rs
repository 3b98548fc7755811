//! `markdown` transcript store: one capped Markdown log per conversation.
//!
//! Files live at `{dir}/{conversation_id}.md`, one block per turn:
//!
//! ```text
//! ### user — 2026-02-19T12:34:56Z
//!
//! message text
//! ```
//!
//! Content lines that would be mistaken for a header (or that start with the
//! escape character) are prefixed with `\` on disk. The log is capped by
//! entry count; oldest entries are dropped first. Each append rewrites the
//! file through a `.md.tmp` sibling and a rename.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::warn;

use crate::error::AppError;
use super::super::store::{TranscriptStore, validate_conversation_id};
use super::super::types::Turn;

/// Default maximum number of transcript entries before FIFO eviction.
pub(crate) const DEFAULT_TRANSCRIPT_CAP: usize = 500;

const HEADER_PREFIX: &str = "### ";
const HEADER_SEPARATOR: &str = " — ";

pub struct MarkdownTranscriptStore {
    dir: PathBuf,
    cap: usize,
}

impl MarkdownTranscriptStore {
    pub fn new(dir: impl Into<PathBuf>, cap: Option<usize>) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir, cap: cap.unwrap_or(DEFAULT_TRANSCRIPT_CAP).max(2) })
    }

    fn path_for(&self, conversation_id: &str) -> Result<PathBuf, AppError> {
        validate_conversation_id(conversation_id)?;
        Ok(self.dir.join(format!("{conversation_id}.md")))
    }

    fn read_text(&self, conversation_id: &str) -> Result<String, AppError> {
        let path = self.path_for(conversation_id)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(AppError::Memory(format!("cannot read {}: {e}", path.display()))),
        }
    }
}

fn escape_line(line: &str) -> String {
    if line.starts_with(HEADER_PREFIX) || line.starts_with('\\') {
        format!("\\{line}")
    } else {
        line.to_string()
    }
}

fn unescape_line(line: &str) -> &str {
    line.strip_prefix('\\').unwrap_or(line)
}

/// Parse a transcript into turns by splitting on `### ` headers.
fn parse_transcript(text: &str) -> Vec<Turn> {
    fn flush(turns: &mut Vec<Turn>, current: Option<(String, String, Vec<&str>)>) {
        let Some((role, timestamp, lines)) = current else { return };
        match role.parse() {
            Ok(role) => turns.push(Turn {
                role,
                text: lines.join("\n").trim().to_string(),
                timestamp,
            }),
            Err(e) => warn!(error = %e, "skipping transcript entry"),
        }
    }

    let mut turns = Vec::new();
    let mut current: Option<(String, String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(header) = line.strip_prefix(HEADER_PREFIX) {
            flush(&mut turns, current.take());
            let (role, ts) = match header.split_once(HEADER_SEPARATOR) {
                Some((r, t)) => (r.trim().to_string(), t.trim().to_string()),
                None => (header.trim().to_string(), String::new()),
            };
            current = Some((role, ts, Vec::new()));
        } else if let Some((_, _, ref mut lines)) = current {
            lines.push(unescape_line(line));
        }
    }
    flush(&mut turns, current);
    turns
}

fn serialise_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for t in turns {
        let body: Vec<String> = t.text.lines().map(escape_line).collect();
        out.push_str(&format!(
            "{HEADER_PREFIX}{}{HEADER_SEPARATOR}{}\n\n{}\n\n",
            t.role,
            t.timestamp,
            body.join("\n")
        ));
    }
    out
}

impl TranscriptStore for MarkdownTranscriptStore {
    fn store_type(&self) -> &str {
        "markdown"
    }

    fn append(&self, conversation_id: &str, turn: &Turn) -> Result<(), AppError> {
        let mut turns = parse_transcript(&self.read_text(conversation_id)?);
        turns.push(turn.clone());

        if turns.len() > self.cap {
            let excess = turns.len() - self.cap;
            turns.drain(..excess);
        }

        let path = self.path_for(conversation_id)?;
        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, serialise_transcript(&turns))
            .map_err(|e| AppError::Memory(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| AppError::Memory(format!("cannot rename {}: {e}", tmp.display())))
    }

    fn read_all(&self, conversation_id: &str) -> Result<Vec<Turn>, AppError> {
        Ok(parse_transcript(&self.read_text(conversation_id)?))
    }

    fn remove(&self, conversation_id: &str) -> Result<bool, AppError> {
        let path = self.path_for(conversation_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Memory(format!("cannot remove {}: {e}", path.display()))),
        }
    }
}
