//! LLM capability trait and prompt shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One prior exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// A fully assembled request for a chat-style model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    /// Prior turns, oldest first.
    pub history: Vec<Turn>,
    /// The final user message (context plus question).
    pub user: String,
}

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// Run the prompt and return the model's text answer.
    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}
