use crate::hierarchy::ObjectId;
use serde::{Deserialize, Serialize};

// ============= Tool Types =============

/// A tool as presented to the language model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the language model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<libsql::Error> for AppError {
    fn from(e: libsql::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Internal(format!("HTTP error: {}", e))
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Error returned by the hierarchical flow.
///
/// Carries the ID of the execution record written for the failed request so
/// the caller can correlate the user-visible failure with the audit trail.
/// `execution_id` is `None` only when the record itself could not be written.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct FlowError {
    pub execution_id: Option<ObjectId>,
    #[source]
    pub source: AppError,
}

impl FlowError {
    pub fn new(source: AppError, execution_id: Option<ObjectId>) -> Self {
        Self {
            execution_id,
            source,
        }
    }

    /// True when the scope had no router to start the flow from.
    pub fn is_not_found(&self) -> bool {
        matches!(self.source, AppError::NotFound(_))
    }
}
