//! Conversation history for agent prompts.
//!
//! History is keyed by conversation (one chat with one end user) and rendered
//! as a delimited block of `User:` / `Agent:` lines placed before the current
//! message in a specialist prompt.

pub mod history;

pub use history::{BoundedHistory, HistoryLimits};

use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Default number of messages kept per conversation (ten exchanges).
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Who wrote a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Agent,
}

impl Author {
    pub fn label(&self) -> &'static str {
        match self {
            Author::User => "User",
            Author::Agent => "Agent",
        }
    }
}

/// Storage for recent conversation turns.
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Rendered history block, or an empty string when there is none.
    async fn render(&self, key: &str) -> Result<String>;

    async fn append(&self, key: &str, author: Author, text: &str) -> Result<()>;

    async fn clear(&self, key: &str) -> Result<()>;
}

/// Render entries (oldest first) as a prompt block.
pub fn render_entries<'a>(entries: impl IntoIterator<Item = (Author, &'a str)>) -> String {
    let lines: Vec<String> = entries
        .into_iter()
        .map(|(author, text)| format!("{}: {}", author.label(), text))
        .collect();

    if lines.is_empty() {
        return String::new();
    }
    format!(
        "\n--- Previous conversation ---\n{}\n-----------------------------\n",
        lines.join("\n")
    )
}
