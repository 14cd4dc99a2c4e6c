//! In-memory agent arena
//!
//! Agents live in a map keyed by [`ObjectId`]; the tree is expressed only
//! through `parent_id` fields, so traversal is a series of lookups.

use super::{Agent, AgentKind, GenerationConfig, ObjectId, ScopeId, Tool, ToolBinding};
use crate::types::{AppError, Result};
use std::collections::{HashMap, VecDeque};

/// Check that `agent` may be placed under `parent`.
///
/// `existing_router` is the currently active router of the agent's scope, if
/// any. Shared by every store so the tree rules hold regardless of backend.
pub fn validate_placement(
    agent: &Agent,
    parent: Option<&Agent>,
    existing_router: Option<&Agent>,
) -> Result<()> {
    if agent.name.trim().is_empty() {
        return Err(AppError::InvalidInput("agent name must not be empty".to_string()));
    }

    match (agent.kind.parent_kind(), parent) {
        (None, None) => {
            if agent.parent_id.is_some() {
                return Err(AppError::InvalidInput("a router cannot have a parent".to_string()));
            }
            if let Some(router) = existing_router {
                if router.is_active && router.id != agent.id && agent.is_active {
                    return Err(AppError::InvalidInput(format!(
                        "scope '{}' already has an active router ({})",
                        agent.scope_id, router.id
                    )));
                }
            }
            Ok(())
        }
        (None, Some(_)) => Err(AppError::InvalidInput("a router cannot have a parent".to_string())),
        (Some(expected), None) => Err(AppError::InvalidInput(format!(
            "{} '{}' requires a {} parent",
            agent.kind, agent.name, expected
        ))),
        (Some(expected), Some(parent)) => {
            if parent.kind != expected {
                return Err(AppError::InvalidInput(format!(
                    "{} '{}' cannot be placed under {} '{}'",
                    agent.kind, agent.name, parent.kind, parent.name
                )));
            }
            if !parent.is_active {
                return Err(AppError::InvalidInput(format!(
                    "parent '{}' is inactive",
                    parent.name
                )));
            }
            if parent.scope_id != agent.scope_id {
                return Err(AppError::InvalidInput(format!(
                    "'{}' and its parent '{}' belong to different scopes",
                    agent.name, parent.name
                )));
            }
            if agent.kind == AgentKind::Parent && agent.organization_id.is_none() {
                return Err(AppError::InvalidInput(format!(
                    "department '{}' must belong to an organization",
                    agent.name
                )));
            }
            Ok(())
        }
    }
}

/// Sort candidates by ascending priority, then name.
pub fn sort_candidates(agents: &mut [Agent]) {
    agents.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
}

#[derive(Debug, Default, Clone)]
pub struct AgentArena {
    agents: HashMap<ObjectId, Agent>,
    tools: HashMap<ObjectId, Tool>,
}

impl AgentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Agent> {
        self.agents.get(id)
    }

    fn get_required(&self, id: &ObjectId) -> Result<&Agent> {
        self.agents
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("agent {}", id)))
    }

    fn get_required_mut(&mut self, id: &ObjectId) -> Result<&mut Agent> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("agent {}", id)))
    }

    /// Insert a fully-formed agent after validating its placement.
    pub fn insert(&mut self, agent: Agent) -> Result<ObjectId> {
        if self.agents.contains_key(&agent.id) {
            return Err(AppError::InvalidInput(format!("agent {} already exists", agent.id)));
        }
        let parent = match &agent.parent_id {
            Some(id) => Some(self.get_required(id)?),
            None => None,
        };
        validate_placement(&agent, parent, self.router(&agent.scope_id))?;

        let id = agent.id.clone();
        self.agents.insert(id.clone(), agent);
        Ok(id)
    }

    pub fn create_router(
        &mut self,
        scope: &ScopeId,
        name: &str,
        persona: &str,
    ) -> Result<ObjectId> {
        self.insert(Agent::router(scope, name, persona))
    }

    /// Create a department under the scope's active router.
    pub fn create_department(
        &mut self,
        scope: &ScopeId,
        organization: &str,
        name: &str,
        persona: &str,
        priority: i32,
    ) -> Result<ObjectId> {
        let router = self
            .router(scope)
            .ok_or_else(|| AppError::NotFound(format!("router for scope {}", scope)))?;
        let agent = Agent::department(router, organization, name, persona).with_priority(priority);
        self.insert(agent)
    }

    /// Create a specialist under an active department.
    pub fn create_specialist(
        &mut self,
        parent_id: &ObjectId,
        name: &str,
        persona: &str,
        priority: i32,
    ) -> Result<ObjectId> {
        let parent = self.get_required(parent_id)?;
        let agent = Agent::specialist(parent, name, persona).with_priority(priority);
        self.insert(agent)
    }

    /// Register a tool, replacing any tool with the same name.
    ///
    /// Existing bindings pick up the new definition.
    pub fn register_tool(&mut self, mut tool: Tool) -> ObjectId {
        if let Some(existing) = self.tool_by_name(&tool.name) {
            tool.id = existing.id.clone();
        }
        let id = tool.id.clone();
        for agent in self.agents.values_mut() {
            for binding in agent.tools.iter_mut().filter(|b| b.tool.id == id) {
                binding.tool = tool.clone();
            }
        }
        self.tools.insert(id.clone(), tool);
        id
    }

    pub fn tool(&self, id: &ObjectId) -> Option<&Tool> {
        self.tools.get(id)
    }

    pub fn tool_by_name(&self, name: &str) -> Option<&Tool> {
        self.tools.values().find(|t| t.name == name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    /// Bind a registered tool to an agent. Rebinding replaces the config and reactivates.
    pub fn bind_tool(
        &mut self,
        agent_id: &ObjectId,
        tool_id: &ObjectId,
        config: Option<serde_json::Value>,
    ) -> Result<()> {
        let tool = self
            .tools
            .get(tool_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("tool {}", tool_id)))?;
        let agent = self.get_required_mut(agent_id)?;

        match agent.tools.iter_mut().find(|b| b.tool.id == *tool_id) {
            Some(binding) => {
                binding.tool = tool;
                binding.is_active = true;
                binding.config = config;
            }
            None => {
                let mut binding = ToolBinding::new(tool);
                binding.config = config;
                agent.tools.push(binding);
            }
        }
        Ok(())
    }

    pub fn unbind_tool(&mut self, agent_id: &ObjectId, tool_id: &ObjectId) -> Result<()> {
        let agent = self.get_required_mut(agent_id)?;
        let binding = agent
            .tools
            .iter_mut()
            .find(|b| b.tool.id == *tool_id)
            .ok_or_else(|| AppError::NotFound(format!("binding {} -> {}", agent_id, tool_id)))?;
        binding.is_active = false;
        Ok(())
    }

    pub fn set_config(&mut self, agent_id: &ObjectId, config: GenerationConfig) -> Result<()> {
        self.get_required_mut(agent_id)?.config = Some(config);
        Ok(())
    }

    pub fn update_persona(&mut self, agent_id: &ObjectId, persona: &str) -> Result<()> {
        let agent = self.get_required_mut(agent_id)?;
        agent.persona = if persona.trim().is_empty() {
            None
        } else {
            Some(persona.to_string())
        };
        Ok(())
    }

    /// Direct children of `id`, active or not.
    pub fn children(&self, id: &ObjectId) -> Vec<&Agent> {
        let mut children: Vec<&Agent> = self
            .agents
            .values()
            .filter(|a| a.parent_id.as_ref() == Some(id))
            .collect();
        children.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        children
    }

    /// All descendants of `id` in breadth-first order.
    pub fn descendants(&self, id: &ObjectId) -> Vec<ObjectId> {
        let mut found = Vec::new();
        let mut queue: VecDeque<ObjectId> = VecDeque::from([id.clone()]);
        while let Some(current) = queue.pop_front() {
            for child in self.children(&current) {
                found.push(child.id.clone());
                queue.push_back(child.id.clone());
            }
        }
        found
    }

    /// Soft-delete an agent and everything below it.
    ///
    /// Returns the IDs that flipped from active to inactive, starting with `id`.
    pub fn deactivate(&mut self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        self.get_required(id)?;
        let mut targets = vec![id.clone()];
        targets.extend(self.descendants(id));

        let mut changed = Vec::new();
        for target in targets {
            if let Some(agent) = self.agents.get_mut(&target) {
                if agent.is_active {
                    agent.is_active = false;
                    changed.push(target);
                }
            }
        }
        Ok(changed)
    }

    /// The agent's own config, or its parent's when a specialist has none.
    pub fn effective_config(&self, id: &ObjectId) -> Option<GenerationConfig> {
        let agent = self.agents.get(id)?;
        if agent.config.is_some() || agent.kind != AgentKind::Child {
            return agent.config.clone();
        }
        agent
            .parent_id
            .as_ref()
            .and_then(|p| self.agents.get(p))
            .and_then(|p| p.config.clone())
    }

    /// A copy of the agent with its effective config filled in.
    pub fn resolved(&self, id: &ObjectId) -> Option<Agent> {
        let mut agent = self.agents.get(id)?.clone();
        agent.config = self.effective_config(id);
        Some(agent)
    }

    /// The active router of a scope.
    pub fn router(&self, scope: &ScopeId) -> Option<&Agent> {
        self.agents
            .values()
            .find(|a| a.kind == AgentKind::Router && a.is_active && a.scope_id == *scope)
    }

    /// Active departments under the scope's active router, best priority first.
    pub fn departments(&self, scope: &ScopeId) -> Vec<Agent> {
        let router_id = match self.router(scope) {
            Some(router) => router.id.clone(),
            None => return Vec::new(),
        };
        self.active_children(&router_id, AgentKind::Parent)
    }

    /// Active specialists of a department, best priority first.
    pub fn specialists(&self, department_id: &ObjectId) -> Vec<Agent> {
        self.active_children(department_id, AgentKind::Child)
    }

    fn active_children(&self, id: &ObjectId, kind: AgentKind) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .values()
            .filter(|a| a.is_active && a.kind == kind && a.parent_id.as_ref() == Some(id))
            .filter_map(|a| self.resolved(&a.id))
            .map(|mut a| {
                a.tools.retain(|b| b.is_active);
                a
            })
            .collect();
        sort_candidates(&mut agents);
        agents
    }

    /// Every agent of a scope, active or not, ordered by depth then priority.
    pub fn agents_in_scope(&self, scope: &ScopeId) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .values()
            .filter(|a| a.scope_id == *scope)
            .cloned()
            .collect();
        agents.sort_by(|a, b| {
            a.kind
                .depth()
                .cmp(&b.kind.depth())
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        agents
    }
}
