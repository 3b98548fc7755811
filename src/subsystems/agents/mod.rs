//! Agents: the per-turn conversation orchestrator and the helpers it shares
//! with the HTTP surface (prompt templates, prompt refinement).

pub mod orchestrator;
pub mod prompt;
pub mod refine;

pub use orchestrator::{
    ChatError, ConversationOrchestrator, ProviderAdvice, ProviderChoice, TurnOutcome, TurnState,
    new_conversation_id,
};
pub use refine::{PromptRefiner, RefineError, RefinedPrompt};
