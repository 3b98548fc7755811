//! Keyword task classifier used when the profile catalog gives no signal.

use std::fmt;

use serde::Serialize;

use super::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Email,
    Report,
    Analysis,
    Code,
    Data,
    Organization,
    General,
}

/// Checked in order; the first task with a matching keyword wins.
const KEYWORDS: &[(TaskType, &[&str])] = &[
    (TaskType::Email, &["email", "e mail"]),
    (TaskType::Report, &["relatorio", "report"]),
    (TaskType::Analysis, &["analise", "analysis", "analyze", "analyse"]),
    (TaskType::Code, &["codigo", "code", "coding"]),
    (TaskType::Data, &["dados", "data"]),
    (TaskType::Organization, &["organizar", "planejar", "organize", "organise", "planning"]),
];

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Report => "report",
            Self::Analysis => "analysis",
            Self::Code => "code",
            Self::Data => "data",
            Self::Organization => "organization",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed provider preference for a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub provider_id: &'static str,
    pub reason: &'static str,
}

/// Classify by substring match on the normalized prompt.
pub fn detect_task_type(prompt: &str) -> TaskType {
    let text = normalize(prompt);
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| text.contains(w)))
        .map(|(task, _)| *task)
        .unwrap_or(TaskType::General)
}

pub fn suggestion(task: TaskType) -> Suggestion {
    let (provider_id, reason) = match task {
        TaskType::Email => ("openai", "ChatGPT adapts its tone automatically"),
        TaskType::Report => ("claude", "Claude delivers impeccable structure"),
        TaskType::Analysis => ("claude", "Claude specializes in deep analysis"),
        TaskType::Code => ("deepseek", "DeepSeek offers technical precision"),
        TaskType::Data => ("deepseek", "DeepSeek specializes in calculations"),
        TaskType::Organization => ("gemini", "Gemini turns chaos into systems"),
        TaskType::General => ("openai", "ChatGPT is the versatile generalist"),
    };
    Suggestion { provider_id, reason }
}
