//! Execution records and the logger that writes them.
//!
//! One record per inbound message, written exactly once whether the flow
//! succeeded or not. The logger never fails the request: store errors and
//! slow writes are reported through `tracing` and the caller gets `None`.

use crate::db::ExecutionStore;
use crate::hierarchy::{Agent, AgentKind, ObjectId, ScopeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single execution write.
pub const DEFAULT_LOG_TIMEOUT: Duration = Duration::from_secs(5);

/// One agent visited by a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub agent_id: ObjectId,
    pub name: String,
    pub role: AgentKind,
}

impl From<&Agent> for ChainEntry {
    fn from(agent: &Agent) -> Self {
        Self {
            agent_id: agent.id.clone(),
            name: agent.name.clone(),
            role: agent.kind,
        }
    }
}

/// A tool call made while answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub agent_id: ObjectId,
    pub tool: String,
    pub success: bool,
}

/// Audit entry for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ObjectId,
    /// The router that started the flow; `None` when no router was found.
    pub origin_agent_id: Option<ObjectId>,
    pub scope_id: ScopeId,
    pub user_message: String,
    pub final_response: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    /// Agents in visitation order.
    pub chain: Vec<ChainEntry>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<ToolUsage>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// A fresh record with a new ID, marked failed until told otherwise.
    pub fn new(scope_id: ScopeId, user_message: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            origin_agent_id: None,
            scope_id,
            user_message: user_message.into(),
            final_response: None,
            duration_ms: 0,
            success: false,
            chain: Vec::new(),
            error_message: None,
            tools_used: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// True when roles never go back up the tree (router, department, specialist).
    pub fn chain_is_ordered(&self) -> bool {
        self.chain
            .windows(2)
            .all(|pair| pair[0].role.depth() <= pair[1].role.depth())
    }
}

/// Appends execution records without ever failing the caller.
#[derive(Clone)]
pub struct ExecutionLogger {
    store: Arc<dyn ExecutionStore>,
    timeout: Duration,
}

impl ExecutionLogger {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_LOG_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist `record`, returning the stored copy or `None` on failure.
    pub async fn log(&self, record: ExecutionRecord) -> Option<ExecutionRecord> {
        let id = record.id.clone();
        match tokio::time::timeout(self.timeout, self.store.append(record)).await {
            Ok(Ok(stored)) => {
                tracing::debug!(execution = %stored.id, success = stored.success, "Execution logged");
                Some(stored)
            }
            Ok(Err(e)) => {
                tracing::error!(execution = %id, error = %e, "Failed to write execution record");
                None
            }
            Err(_) => {
                tracing::error!(
                    execution = %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Execution record write timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::types::{AppError, Result};
    use async_trait::async_trait;

    fn scope() -> ScopeId {
        ScopeId::new("scope-1").unwrap()
    }

    struct BrokenStore;

    #[async_trait]
    impl ExecutionStore for BrokenStore {
        async fn append(&self, _record: ExecutionRecord) -> Result<ExecutionRecord> {
            Err(AppError::Database("disk full".to_string()))
        }

        async fn recent(&self, _scope: &ScopeId, _limit: usize) -> Result<Vec<ExecutionRecord>> {
            Ok(Vec::new())
        }
    }

    struct SlowStore;

    #[async_trait]
    impl ExecutionStore for SlowStore {
        async fn append(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(record)
        }

        async fn recent(&self, _scope: &ScopeId, _limit: usize) -> Result<Vec<ExecutionRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_log_appends_once() {
        let store = Arc::new(InMemoryStore::new());
        let logger = ExecutionLogger::new(store.clone());
        let record = ExecutionRecord::new(scope(), "hello");

        let stored = logger.log(record.clone()).await.unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(store.executions().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let logger = ExecutionLogger::new(Arc::new(BrokenStore));
        assert!(logger.log(ExecutionRecord::new(scope(), "hi")).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_store_is_bounded() {
        let logger =
            ExecutionLogger::new(Arc::new(SlowStore)).with_timeout(Duration::from_millis(20));
        assert!(logger.log(ExecutionRecord::new(scope(), "hi")).await.is_none());
    }

    #[test]
    fn test_chain_ordering() {
        let router = Agent::router(&scope(), "Router", "");
        let dept = Agent::department(&router, "Default", "Support", "");
        let child = Agent::specialist(&dept, "Products", "");

        let mut record = ExecutionRecord::new(scope(), "hi");
        record.chain = vec![(&router).into(), (&dept).into(), (&child).into()];
        assert!(record.chain_is_ordered());

        record.chain = vec![(&router).into(), (&child).into(), (&dept).into()];
        assert!(!record.chain_is_ordered());
    }
}
