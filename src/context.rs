//! Context assembly for compute service calls
//!
//! The compute service's own context window is finite, so each turn gets a
//! bounded window of recent history. Truncation is by recency only; there
//! is no summarization here.

use serde::Serialize;

use crate::db::{ConversationRepo, Source};
use crate::Result;

/// Configuration for context building
#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    /// Maximum number of messages to include from history
    pub max_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_messages: 20 }
    }
}

/// One prior turn as handed to the compute service
#[derive(Debug, Clone, Serialize)]
pub struct TurnContext {
    pub role: String,
    pub content: String,
    pub sources: Vec<Source>,
}

/// Builds the conversation-history window for a turn
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    /// Create a new context builder
    #[must_use]
    pub const fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Build the history window for a thread, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operations fail
    pub fn build(&self, repo: &ConversationRepo, thread_id: &str) -> Result<Vec<TurnContext>> {
        let messages = repo.list_recent_messages(thread_id, self.config.max_messages)?;

        Ok(messages
            .into_iter()
            .map(|m| TurnContext {
                role: m.role.to_string(),
                content: m.content,
                sources: m.sources,
            })
            .collect())
    }
}
