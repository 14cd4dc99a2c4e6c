//! Lock-guarded in-process store.
//!
//! Wraps an [`AgentArena`] and an execution vector behind `parking_lot`
//! locks. Suitable for embedding and tests; nothing survives a restart.

use super::traits::{AgentRepository, ExecutionStore, HierarchyStore};
use crate::agents::execution_log::ExecutionRecord;
use crate::hierarchy::{Agent, AgentArena, GenerationConfig, ObjectId, ScopeId, Tool};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    arena: RwLock<AgentArena>,
    executions: RwLock<Vec<ExecutionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_arena(arena: AgentArena) -> Self {
        Self {
            arena: RwLock::new(arena),
            executions: RwLock::new(Vec::new()),
        }
    }

    /// Run a closure with mutable access to the arena.
    pub fn with_arena<T>(&self, f: impl FnOnce(&mut AgentArena) -> T) -> T {
        f(&mut self.arena.write())
    }

    /// Snapshot of every stored execution record, oldest first.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.read().clone()
    }
}

#[async_trait]
impl AgentRepository for InMemoryStore {
    async fn get_router(&self, scope: &ScopeId) -> Result<Option<Agent>> {
        let arena = self.arena.read();
        Ok(arena.router(scope).and_then(|r| {
            let mut router = arena.resolved(&r.id)?;
            router.tools.retain(|b| b.is_active);
            Some(router)
        }))
    }

    async fn get_departments(&self, scope: &ScopeId) -> Result<Vec<Agent>> {
        Ok(self.arena.read().departments(scope))
    }

    async fn get_specialists(&self, department_id: &ObjectId) -> Result<Vec<Agent>> {
        Ok(self.arena.read().specialists(department_id))
    }
}

#[async_trait]
impl HierarchyStore for InMemoryStore {
    async fn upsert_tool(&self, tool: Tool) -> Result<ObjectId> {
        Ok(self.arena.write().register_tool(tool))
    }

    async fn find_tool(&self, name: &str) -> Result<Option<Tool>> {
        Ok(self.arena.read().tool_by_name(name).cloned())
    }

    async fn insert_agent(&self, agent: Agent) -> Result<ObjectId> {
        self.arena.write().insert(agent)
    }

    async fn get_agent(&self, id: &ObjectId) -> Result<Option<Agent>> {
        Ok(self.arena.read().get(id).cloned())
    }

    async fn bind_tool(
        &self,
        agent_id: &ObjectId,
        tool_id: &ObjectId,
        config: Option<serde_json::Value>,
    ) -> Result<()> {
        self.arena.write().bind_tool(agent_id, tool_id, config)
    }

    async fn set_config(&self, agent_id: &ObjectId, config: GenerationConfig) -> Result<()> {
        self.arena.write().set_config(agent_id, config)
    }

    async fn deactivate_agent(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        self.arena.write().deactivate(id)
    }

    async fn list_agents(&self, scope: &ScopeId) -> Result<Vec<Agent>> {
        Ok(self.arena.read().agents_in_scope(scope))
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn append(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        let mut executions = self.executions.write();
        if executions.iter().any(|r| r.id == record.id) {
            return Err(AppError::InvalidInput(format!(
                "execution {} already recorded",
                record.id
            )));
        }
        executions.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, scope: &ScopeId, limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .executions
            .read()
            .iter()
            .rev()
            .filter(|r| r.scope_id == *scope)
            .take(limit)
            .cloned()
            .collect())
    }
}
