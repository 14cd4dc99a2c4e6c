//! libsql-backed store (local file, in-memory, or remote Turso).

use super::traits::{AgentRepository, ExecutionStore, HierarchyStore};
use crate::agents::execution_log::{ChainEntry, ExecutionRecord, ToolUsage};
use crate::hierarchy::arena::{sort_candidates, validate_placement};
use crate::hierarchy::{
    Agent, AgentKind, GenerationConfig, ObjectId, ScopeId, Tool, ToolBinding, ToolKind,
};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row, Value};
use std::collections::VecDeque;

const AGENT_COLUMNS: &str = "a.id, a.name, a.persona, a.kind, a.scope_id, a.organization_id, \
     a.parent_id, a.is_active, a.priority, c.model, c.temperature, c.max_tokens, \
     c.system_prompt, c.fallback_message";

const PARENT_KINDS: &str = "('PARENT', 'PAI')";
const CHILD_KINDS: &str = "('CHILD', 'FILHO')";

pub struct TursoStore {
    // Kept alive for the lifetime of the connection.
    _db: Database,
    conn: Connection,
}

impl TursoStore {
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Turso: {}", e)))?;
        Self::open(db).await
    }

    pub async fn new_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open database {}: {}", path, e)))?;
        Self::open(db).await
    }

    /// A private in-memory database. Every store gets its own.
    pub async fn new_memory() -> Result<Self> {
        Self::new_local(":memory:").await
    }

    async fn open(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;
        let store = Self { _db: db, conn };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Shared connection, also used by database tools.
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            (
                "agents",
                "CREATE TABLE IF NOT EXISTS agents (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    persona TEXT,
                    kind TEXT NOT NULL,
                    scope_id TEXT NOT NULL,
                    organization_id TEXT,
                    parent_id TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    priority INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    FOREIGN KEY (parent_id) REFERENCES agents(id)
                )",
            ),
            (
                "agent_configs",
                "CREATE TABLE IF NOT EXISTS agent_configs (
                    agent_id TEXT PRIMARY KEY,
                    model TEXT,
                    temperature REAL,
                    max_tokens INTEGER,
                    system_prompt TEXT,
                    fallback_message TEXT,
                    FOREIGN KEY (agent_id) REFERENCES agents(id)
                )",
            ),
            (
                "tools",
                "CREATE TABLE IF NOT EXISTS tools (
                    id TEXT PRIMARY KEY,
                    name TEXT UNIQUE NOT NULL,
                    description TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    parameters TEXT NOT NULL,
                    config TEXT NOT NULL
                )",
            ),
            (
                "agent_tools",
                "CREATE TABLE IF NOT EXISTS agent_tools (
                    agent_id TEXT NOT NULL,
                    tool_id TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    config TEXT,
                    PRIMARY KEY (agent_id, tool_id),
                    FOREIGN KEY (agent_id) REFERENCES agents(id),
                    FOREIGN KEY (tool_id) REFERENCES tools(id)
                )",
            ),
            (
                "executions",
                "CREATE TABLE IF NOT EXISTS executions (
                    id TEXT PRIMARY KEY,
                    origin_agent_id TEXT,
                    scope_id TEXT NOT NULL,
                    user_message TEXT NOT NULL,
                    final_response TEXT,
                    duration_ms INTEGER NOT NULL,
                    success INTEGER NOT NULL,
                    chain TEXT NOT NULL,
                    error_message TEXT,
                    tools_used TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )",
            ),
            (
                "agents index",
                "CREATE INDEX IF NOT EXISTS idx_agents_scope ON agents(scope_id, kind, is_active)",
            ),
            (
                "agents parent index",
                "CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents(parent_id)",
            ),
            (
                "executions index",
                "CREATE INDEX IF NOT EXISTS idx_executions_scope ON executions(scope_id, created_at)",
            ),
        ];

        for (label, sql) in statements {
            self.conn
                .execute(sql, ())
                .await
                .map_err(|e| AppError::Database(format!("Failed to create {}: {}", label, e)))?;
        }
        Ok(())
    }

    async fn query_agents(&self, filter: &str, params: Vec<Value>) -> Result<Vec<Agent>> {
        let sql = format!(
            "SELECT {} FROM agents a LEFT JOIN agent_configs c ON c.agent_id = a.id WHERE {} \
             ORDER BY a.priority ASC, a.name ASC",
            AGENT_COLUMNS, filter
        );
        let mut rows = self
            .conn
            .query(&sql, params)
            .await
            .map_err(|e| AppError::Database(format!("Failed to query agents: {}", e)))?;

        let mut agents = Vec::new();
        while let Some(row) = rows.next().await? {
            agents.push(agent_from_row(&row)?);
        }
        Ok(agents)
    }

    async fn load_bindings(&self, agent_id: &ObjectId, only_active: bool) -> Result<Vec<ToolBinding>> {
        let sql = format!(
            "SELECT t.id, t.name, t.description, t.kind, t.parameters, t.config, at.is_active, at.config \
             FROM agent_tools at JOIN tools t ON t.id = at.tool_id \
             WHERE at.agent_id = ?{} ORDER BY t.name ASC",
            if only_active { " AND at.is_active = 1" } else { "" }
        );
        let mut rows = self
            .conn
            .query(&sql, vec![Value::Text(agent_id.to_string())])
            .await
            .map_err(|e| AppError::Database(format!("Failed to query tool bindings: {}", e)))?;

        let mut bindings = Vec::new();
        while let Some(row) = rows.next().await? {
            let tool = tool_from_row(&row)?;
            let config = match opt_text(&row, 7)? {
                Some(raw) => Some(parse_json(&raw, "binding config")?),
                None => None,
            };
            bindings.push(ToolBinding {
                tool,
                is_active: row.get::<i64>(6)? != 0,
                config,
            });
        }
        Ok(bindings)
    }

    /// Fill tools and inherited config for agents returned to the flow.
    async fn hydrate(&self, mut agents: Vec<Agent>) -> Result<Vec<Agent>> {
        for agent in agents.iter_mut() {
            agent.tools = self.load_bindings(&agent.id, true).await?;
            if agent.config.is_none() && agent.kind == AgentKind::Child {
                if let Some(parent_id) = agent.parent_id.clone() {
                    agent.config = self.load_config(&parent_id).await?;
                }
            }
        }
        Ok(agents)
    }

    async fn load_config(&self, agent_id: &ObjectId) -> Result<Option<GenerationConfig>> {
        let mut rows = self
            .conn
            .query(
                "SELECT model, temperature, max_tokens, system_prompt, fallback_message \
                 FROM agent_configs WHERE agent_id = ?",
                vec![Value::Text(agent_id.to_string())],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(config_from_row(&row, 0)?)),
            None => Ok(None),
        }
    }

    async fn child_ids(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM agents WHERE parent_id = ? ORDER BY priority ASC, name ASC",
                vec![Value::Text(id.to_string())],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(ObjectId::parse(&row.get::<String>(0)?)?);
        }
        Ok(ids)
    }

    async fn write_config(&self, agent_id: &ObjectId, config: &GenerationConfig) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO agent_configs
                 (agent_id, model, temperature, max_tokens, system_prompt, fallback_message)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    model = excluded.model,
                    temperature = excluded.temperature,
                    max_tokens = excluded.max_tokens,
                    system_prompt = excluded.system_prompt,
                    fallback_message = excluded.fallback_message",
                vec![
                    Value::Text(agent_id.to_string()),
                    nullable_text(config.model.clone()),
                    config
                        .temperature
                        .map(|t| Value::Real(t as f64))
                        .unwrap_or(Value::Null),
                    config
                        .max_tokens
                        .map(|t| Value::Integer(t as i64))
                        .unwrap_or(Value::Null),
                    nullable_text(config.system_prompt.clone()),
                    nullable_text(config.fallback_message.clone()),
                ],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to store agent config: {}", e)))?;
        Ok(())
    }

    async fn write_binding(
        &self,
        agent_id: &ObjectId,
        tool_id: &ObjectId,
        is_active: bool,
        config: Option<serde_json::Value>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO agent_tools (agent_id, tool_id, is_active, config)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(agent_id, tool_id) DO UPDATE SET
                    is_active = excluded.is_active,
                    config = excluded.config",
                vec![
                    Value::Text(agent_id.to_string()),
                    Value::Text(tool_id.to_string()),
                    Value::Integer(is_active as i64),
                    nullable_text(config.map(|c| c.to_string())),
                ],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to bind tool: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl AgentRepository for TursoStore {
    async fn get_router(&self, scope: &ScopeId) -> Result<Option<Agent>> {
        let agents = self
            .query_agents(
                "a.scope_id = ? AND a.kind = 'ROUTER' AND a.is_active = 1",
                vec![Value::Text(scope.to_string())],
            )
            .await?;
        Ok(self.hydrate(agents).await?.into_iter().next())
    }

    async fn get_departments(&self, scope: &ScopeId) -> Result<Vec<Agent>> {
        let router = match self.get_router(scope).await? {
            Some(router) => router,
            None => return Ok(Vec::new()),
        };
        let filter = format!(
            "a.parent_id = ? AND a.kind IN {} AND a.is_active = 1",
            PARENT_KINDS
        );
        let mut agents = self
            .hydrate(
                self.query_agents(&filter, vec![Value::Text(router.id.to_string())])
                    .await?,
            )
            .await?;
        sort_candidates(&mut agents);
        Ok(agents)
    }

    async fn get_specialists(&self, department_id: &ObjectId) -> Result<Vec<Agent>> {
        let filter = format!(
            "a.parent_id = ? AND a.kind IN {} AND a.is_active = 1",
            CHILD_KINDS
        );
        let mut agents = self
            .hydrate(
                self.query_agents(&filter, vec![Value::Text(department_id.to_string())])
                    .await?,
            )
            .await?;
        sort_candidates(&mut agents);
        Ok(agents)
    }
}

#[async_trait]
impl HierarchyStore for TursoStore {
    async fn upsert_tool(&self, tool: Tool) -> Result<ObjectId> {
        self.conn
            .execute(
                "INSERT INTO tools (id, name, description, kind, parameters, config)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(name) DO UPDATE SET
                    description = excluded.description,
                    kind = excluded.kind,
                    parameters = excluded.parameters,
                    config = excluded.config",
                vec![
                    Value::Text(tool.id.to_string()),
                    Value::Text(tool.name.clone()),
                    Value::Text(tool.description.clone()),
                    Value::Text(tool.kind.as_str().to_string()),
                    Value::Text(tool.parameters.to_string()),
                    Value::Text(tool.config.to_string()),
                ],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to store tool: {}", e)))?;

        self.find_tool(&tool.name)
            .await?
            .map(|t| t.id)
            .ok_or_else(|| AppError::Database(format!("tool '{}' missing after upsert", tool.name)))
    }

    async fn find_tool(&self, name: &str) -> Result<Option<Tool>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, description, kind, parameters, config FROM tools WHERE name = ?",
                vec![Value::Text(name.to_string())],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(tool_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_agent(&self, agent: Agent) -> Result<ObjectId> {
        if self.get_agent(&agent.id).await?.is_some() {
            return Err(AppError::InvalidInput(format!("agent {} already exists", agent.id)));
        }
        let parent = match &agent.parent_id {
            Some(id) => Some(
                self.get_agent(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("agent {}", id)))?,
            ),
            None => None,
        };
        let router = self.get_router(&agent.scope_id).await?;
        validate_placement(&agent, parent.as_ref(), router.as_ref())?;

        self.conn
            .execute(
                "INSERT INTO agents
                 (id, name, persona, kind, scope_id, organization_id, parent_id, is_active, priority, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Text(agent.id.to_string()),
                    Value::Text(agent.name.clone()),
                    nullable_text(agent.persona.clone()),
                    Value::Text(agent.kind.as_str().to_string()),
                    Value::Text(agent.scope_id.to_string()),
                    nullable_text(agent.organization_id.clone()),
                    nullable_text(agent.parent_id.as_ref().map(|p| p.to_string())),
                    Value::Integer(agent.is_active as i64),
                    Value::Integer(agent.priority as i64),
                    Value::Integer(Utc::now().timestamp()),
                ],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert agent: {}", e)))?;

        if let Some(config) = &agent.config {
            self.write_config(&agent.id, config).await?;
        }
        for binding in &agent.tools {
            let tool_id = self.upsert_tool(binding.tool.clone()).await?;
            self.write_binding(&agent.id, &tool_id, binding.is_active, binding.config.clone())
                .await?;
        }
        Ok(agent.id)
    }

    async fn get_agent(&self, id: &ObjectId) -> Result<Option<Agent>> {
        let agents = self
            .query_agents("a.id = ?", vec![Value::Text(id.to_string())])
            .await?;
        match agents.into_iter().next() {
            Some(mut agent) => {
                agent.tools = self.load_bindings(&agent.id, false).await?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    async fn bind_tool(
        &self,
        agent_id: &ObjectId,
        tool_id: &ObjectId,
        config: Option<serde_json::Value>,
    ) -> Result<()> {
        if self
            .query_agents("a.id = ?", vec![Value::Text(agent_id.to_string())])
            .await?
            .is_empty()
        {
            return Err(AppError::NotFound(format!("agent {}", agent_id)));
        }
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM tools WHERE id = ?",
                vec![Value::Text(tool_id.to_string())],
            )
            .await?;
        if rows.next().await?.is_none() {
            return Err(AppError::NotFound(format!("tool {}", tool_id)));
        }

        self.write_binding(agent_id, tool_id, true, config).await
    }

    async fn set_config(&self, agent_id: &ObjectId, config: GenerationConfig) -> Result<()> {
        if self.get_agent(agent_id).await?.is_none() {
            return Err(AppError::NotFound(format!("agent {}", agent_id)));
        }
        self.write_config(agent_id, &config).await
    }

    async fn deactivate_agent(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        if self.get_agent(id).await?.is_none() {
            return Err(AppError::NotFound(format!("agent {}", id)));
        }

        let mut targets = vec![id.clone()];
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(current) = queue.pop_front() {
            for child in self.child_ids(&current).await? {
                targets.push(child.clone());
                queue.push_back(child);
            }
        }

        let mut changed = Vec::new();
        for target in targets {
            let affected = self
                .conn
                .execute(
                    "UPDATE agents SET is_active = 0 WHERE id = ? AND is_active = 1",
                    vec![Value::Text(target.to_string())],
                )
                .await
                .map_err(|e| AppError::Database(format!("Failed to deactivate agent: {}", e)))?;
            if affected > 0 {
                changed.push(target);
            }
        }
        Ok(changed)
    }

    async fn list_agents(&self, scope: &ScopeId) -> Result<Vec<Agent>> {
        let mut agents = self
            .query_agents("a.scope_id = ?", vec![Value::Text(scope.to_string())])
            .await?;
        for agent in agents.iter_mut() {
            agent.tools = self.load_bindings(&agent.id, false).await?;
        }
        agents.sort_by(|a, b| {
            a.kind
                .depth()
                .cmp(&b.kind.depth())
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(agents)
    }
}

#[async_trait]
impl ExecutionStore for TursoStore {
    async fn append(&self, record: ExecutionRecord) -> Result<ExecutionRecord> {
        let chain = serde_json::to_string(&record.chain)
            .map_err(|e| AppError::Internal(format!("Failed to encode chain: {}", e)))?;
        let tools_used = serde_json::to_string(&record.tools_used)
            .map_err(|e| AppError::Internal(format!("Failed to encode tool usage: {}", e)))?;

        self.conn
            .execute(
                "INSERT INTO executions
                 (id, origin_agent_id, scope_id, user_message, final_response, duration_ms,
                  success, chain, error_message, tools_used, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Text(record.id.to_string()),
                    nullable_text(record.origin_agent_id.as_ref().map(|id| id.to_string())),
                    Value::Text(record.scope_id.to_string()),
                    Value::Text(record.user_message.clone()),
                    nullable_text(record.final_response.clone()),
                    Value::Integer(record.duration_ms as i64),
                    Value::Integer(record.success as i64),
                    Value::Text(chain),
                    nullable_text(record.error_message.clone()),
                    Value::Text(tools_used),
                    Value::Integer(record.created_at.timestamp_millis()),
                ],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to append execution: {}", e)))?;
        Ok(record)
    }

    async fn recent(&self, scope: &ScopeId, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, origin_agent_id, scope_id, user_message, final_response, duration_ms,
                        success, chain, error_message, tools_used, created_at
                 FROM executions WHERE scope_id = ?
                 ORDER BY created_at DESC, rowid DESC LIMIT ?",
                vec![
                    Value::Text(scope.to_string()),
                    Value::Integer(limit as i64),
                ],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query executions: {}", e)))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(execution_from_row(&row)?);
        }
        Ok(records)
    }
}

fn nullable_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(AppError::Database(format!(
            "expected text in column {}, found {:?}",
            idx, other
        ))),
    }
}

fn opt_id(row: &Row, idx: i32) -> Result<Option<ObjectId>> {
    opt_text(row, idx)?.map(|s| ObjectId::parse(&s)).transpose()
}

fn parse_json(raw: &str, what: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| AppError::Database(format!("Invalid {} JSON: {}", what, e)))
}

fn config_from_row(row: &Row, offset: i32) -> Result<GenerationConfig> {
    let temperature = match row.get_value(offset + 1)? {
        Value::Null => None,
        Value::Real(t) => Some(t as f32),
        Value::Integer(t) => Some(t as f32),
        other => {
            return Err(AppError::Database(format!("invalid temperature {:?}", other)));
        }
    };
    let max_tokens = match row.get_value(offset + 2)? {
        Value::Null => None,
        Value::Integer(t) => Some(
            u32::try_from(t).map_err(|_| AppError::Database(format!("invalid max_tokens {}", t)))?,
        ),
        other => {
            return Err(AppError::Database(format!("invalid max_tokens {:?}", other)));
        }
    };
    Ok(GenerationConfig {
        model: opt_text(row, offset)?,
        temperature,
        max_tokens,
        system_prompt: opt_text(row, offset + 3)?,
        fallback_message: opt_text(row, offset + 4)?,
    })
}

fn agent_from_row(row: &Row) -> Result<Agent> {
    let kind: AgentKind = row.get::<String>(3)?.parse()?;
    let config = config_from_row(row, 9)?;
    Ok(Agent {
        id: ObjectId::parse(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        persona: opt_text(row, 2)?,
        kind,
        scope_id: ScopeId::new(row.get::<String>(4)?)?,
        organization_id: opt_text(row, 5)?,
        parent_id: opt_id(row, 6)?,
        is_active: row.get::<i64>(7)? != 0,
        priority: row.get::<i64>(8)? as i32,
        // LEFT JOIN yields an all-null config when the agent has none.
        config: if config == GenerationConfig::default() {
            None
        } else {
            Some(config)
        },
        tools: Vec::new(),
    })
}

fn tool_from_row(row: &Row) -> Result<Tool> {
    let kind: ToolKind = row.get::<String>(3)?.parse()?;
    Ok(Tool {
        id: ObjectId::parse(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        description: row.get(2)?,
        kind,
        parameters: parse_json(&row.get::<String>(4)?, "tool parameters")?,
        config: parse_json(&row.get::<String>(5)?, "tool config")?,
    })
}

fn execution_from_row(row: &Row) -> Result<ExecutionRecord> {
    let chain: Vec<ChainEntry> = serde_json::from_str(&row.get::<String>(7)?)
        .map_err(|e| AppError::Database(format!("Invalid chain JSON: {}", e)))?;
    let tools_used: Vec<ToolUsage> = serde_json::from_str(&row.get::<String>(9)?)
        .map_err(|e| AppError::Database(format!("Invalid tools_used JSON: {}", e)))?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(row.get::<i64>(10)?)
        .ok_or_else(|| AppError::Database("invalid execution timestamp".to_string()))?;

    Ok(ExecutionRecord {
        id: ObjectId::parse(&row.get::<String>(0)?)?,
        origin_agent_id: opt_id(row, 1)?,
        scope_id: ScopeId::new(row.get::<String>(2)?)?,
        user_message: row.get(3)?,
        final_response: opt_text(row, 4)?,
        duration_ms: row.get::<i64>(5)?.max(0) as u64,
        success: row.get::<i64>(6)? != 0,
        chain,
        error_message: opt_text(row, 8)?,
        tools_used,
        created_at,
    })
}
