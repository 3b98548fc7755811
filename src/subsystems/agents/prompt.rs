//! Layered prompt builder.
//!
//! Instruction templates live under `config/prompts/` as plain text. Each
//! layer is appended in order; missing files are skipped, or replaced by an
//! inline fallback with [`layer_or`](PromptBuilder::layer_or), so a checkout
//! without the prompt files still works.
//!
//! Variable substitution uses `{{key}}` syntax and is applied once at
//! [`build()`](PromptBuilder::build) time, in a single pass: text substituted
//! for one variable is never scanned for further placeholders, so user input
//! containing `{{...}}` passes through untouched.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::{Captures, Regex};

const SEPARATOR: &str = "\n\n";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder regex"));

/// Fluent builder that assembles a prompt from template files.
///
/// ```rust
/// use lateral::subsystems::agents::prompt::PromptBuilder;
///
/// let prompt = PromptBuilder::new("config/prompts")
///     .layer_or("summarize.txt", "Summarize in {{limit}} words:\n\n{{conversation}}")
///     .var("limit", "150")
///     .var("conversation", "User: hi")
///     .build();
/// assert!(prompt.contains("150"));
/// ```
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self { prompts_dir: prompts_dir.into(), parts: Vec::new(), vars: HashMap::new() }
    }

    /// Append a layer by loading `filename` from the prompts directory.
    /// Silently skips the layer when the file does not exist.
    pub fn layer(mut self, filename: &str) -> Self {
        if let Some(text) = self.read(filename) {
            self.parts.push(text);
        }
        self
    }

    /// Like [`layer`](Self::layer) but uses `fallback` when the file is
    /// missing or empty.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        match self.read(filename) {
            Some(text) => self.parts.push(text),
            None => self = self.append(fallback),
        }
        self
    }

    fn read(&self, filename: &str) -> Option<String> {
        let path = self.prompts_dir.join(filename);
        match fs::read_to_string(&path) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(_) => {
                tracing::debug!("prompt: layer '{}' not found, skipped", path.display());
                None
            }
        }
    }

    /// Directly append a text fragment.
    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    /// Register `{{key}}` → `value` substitution pairs applied at build time.
    pub fn with_vars<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in vars {
            self.vars.insert(k.to_string(), v.to_string());
        }
        self
    }

    /// Register a single variable.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all layers with blank lines and substitute registered variables.
    /// Unregistered placeholders are left as-is.
    pub fn build(self) -> String {
        let joined = self.parts.join(SEPARATOR);
        PLACEHOLDER
            .replace_all(&joined, |caps: &Captures<'_>| match self.vars.get(&caps[1]) {
                Some(v) => v.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
