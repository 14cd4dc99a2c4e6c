//! Storage abstraction traits
//!
//! The flow only reads through [`AgentRepository`] and appends through
//! [`ExecutionStore`]. Hierarchy management (seeding, provisioning,
//! deactivation) goes through [`HierarchyStore`].
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard::db::DatabaseProvider;
//!
//! // In-memory libsql database (default for development/testing)
//! let store = DatabaseProvider::Memory.create_store().await?;
//!
//! // File-based SQLite
//! let store = DatabaseProvider::SQLite { path: "switchboard.db".into() }.create_store().await?;
//! ```

use crate::agents::execution_log::ExecutionRecord;
use crate::hierarchy::{Agent, GenerationConfig, ObjectId, ScopeId, Tool};
use crate::types::Result;
use async_trait::async_trait;

/// Database provider configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DatabaseProvider {
    /// In-memory SQLite database (ephemeral, lost on restart)
    #[default]
    Memory,
    /// File-based SQLite database
    SQLite {
        /// Path to the SQLite database file
        path: String,
    },
    /// Remote Turso database (requires network access)
    #[cfg(feature = "turso")]
    Turso {
        /// The Turso database URL (e.g., `libsql://your-db.turso.io`)
        url: String,
        /// Authentication token for the Turso database
        auth_token: String,
    },
}

impl DatabaseProvider {
    /// Open the libsql-backed store for this provider and create its schema.
    pub async fn create_store(&self) -> Result<super::turso::TursoStore> {
        match self {
            DatabaseProvider::Memory => super::turso::TursoStore::new_memory().await,
            DatabaseProvider::SQLite { path } => super::turso::TursoStore::new_local(path).await,
            #[cfg(feature = "turso")]
            DatabaseProvider::Turso { url, auth_token } => {
                super::turso::TursoStore::new_remote(url.clone(), auth_token.clone()).await
            }
        }
    }

    /// Resolve a `database.url` setting.
    ///
    /// `:memory:` (or empty) selects the in-memory database, `libsql://` and
    /// `https://` URLs select Turso when the `turso` feature is enabled, and
    /// anything else is treated as a file path.
    pub fn from_url(url: &str, _auth_token: Option<String>) -> Self {
        let url = url.trim();
        if url.is_empty() || url == ":memory:" {
            return DatabaseProvider::Memory;
        }

        #[cfg(feature = "turso")]
        {
            if url.starts_with("libsql://") || url.starts_with("https://") {
                return DatabaseProvider::Turso {
                    url: url.to_string(),
                    auth_token: _auth_token.unwrap_or_default(),
                };
            }
        }

        DatabaseProvider::SQLite {
            path: url.trim_start_matches("file:").to_string(),
        }
    }
}

/// Read access to the active agent hierarchy.
///
/// Every read is filtered to active agents; returned agents carry only their
/// active tool bindings and their effective generation config.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// The active router of a scope, if any.
    async fn get_router(&self, scope: &ScopeId) -> Result<Option<Agent>>;

    /// Active departments of a scope, sorted by `(priority, name)`.
    async fn get_departments(&self, scope: &ScopeId) -> Result<Vec<Agent>>;

    /// Active specialists of a department, sorted by `(priority, name)`.
    async fn get_specialists(&self, department_id: &ObjectId) -> Result<Vec<Agent>>;
}

/// Hierarchy management operations.
#[async_trait]
pub trait HierarchyStore: AgentRepository {
    /// Insert or replace a tool by name, returning its ID.
    async fn upsert_tool(&self, tool: Tool) -> Result<ObjectId>;

    async fn find_tool(&self, name: &str) -> Result<Option<Tool>>;

    /// Insert an agent, enforcing the tree rules.
    async fn insert_agent(&self, agent: Agent) -> Result<ObjectId>;

    async fn get_agent(&self, id: &ObjectId) -> Result<Option<Agent>>;

    async fn bind_tool(
        &self,
        agent_id: &ObjectId,
        tool_id: &ObjectId,
        config: Option<serde_json::Value>,
    ) -> Result<()>;

    async fn set_config(&self, agent_id: &ObjectId, config: GenerationConfig) -> Result<()>;

    /// Soft-delete an agent and its descendants, returning the affected IDs.
    async fn deactivate_agent(&self, id: &ObjectId) -> Result<Vec<ObjectId>>;

    /// Every agent of a scope, including inactive ones.
    async fn list_agents(&self, scope: &ScopeId) -> Result<Vec<Agent>>;
}

/// Append-only audit log of flow executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn append(&self, record: ExecutionRecord) -> Result<ExecutionRecord>;

    /// Most recent records of a scope, newest first.
    async fn recent(&self, scope: &ScopeId, limit: usize) -> Result<Vec<ExecutionRecord>>;
}
