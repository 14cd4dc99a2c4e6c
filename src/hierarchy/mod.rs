//! Agent hierarchy data model
//!
//! A scope (one messaging instance) owns exactly one active Router. Routers
//! own Departments (`PARENT`), Departments own Specialists (`CHILD`).
//! Parent links are plain [`ObjectId`]s; [`AgentArena`] turns traversal into
//! map lookups.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard::hierarchy::{AgentArena, ScopeId};
//!
//! let mut arena = AgentArena::new();
//! let scope = ScopeId::new("instance-1")?;
//! let router = arena.create_router(&scope, "Router", "You route customer messages.")?;
//! let sales = arena.create_department(&scope, "Default", "Sales", "Handles purchases.", 1)?;
//! arena.create_specialist(&sales, "Quotes", "Builds price quotes.", 1)?;
//! ```

pub mod arena;
pub mod seed;

pub use arena::AgentArena;
pub use seed::{provision_default, DefaultStructure, HierarchySpec, SeedReport, DEFAULT_PRODUCT_TOOL};

use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical identifier for agents, tools and execution records.
///
/// 24 lowercase hex characters: a 4-byte big-endian Unix timestamp followed
/// by 8 random bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Length of the hex representation.
    pub const LEN: usize = 24;

    /// Generate a fresh identifier.
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp() as u32;
        let tail: [u8; 8] = rand::random();
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&tail);
        Self(hex::encode(bytes))
    }

    /// Parse and validate an identifier.
    pub fn parse(value: &str) -> Result<Self> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(AppError::InvalidInput(format!(
                "'{}' is not a {}-character lowercase hex id",
                value,
                Self::LEN
            )))
        }
    }

    /// Check the format without allocating.
    pub fn is_valid(value: &str) -> bool {
        value.len() == Self::LEN && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Tenancy boundary (one messaging instance) within which a Router is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::InvalidInput("scope id must not be empty".to_string()));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ScopeId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ScopeId> for String {
    fn from(id: ScopeId) -> Self {
        id.0
    }
}

/// Position of an agent in the three-level tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentKind {
    #[serde(alias = "router")]
    Router,
    #[serde(alias = "PAI", alias = "parent", alias = "department")]
    Parent,
    #[serde(alias = "FILHO", alias = "child", alias = "specialist")]
    Child,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Router => "ROUTER",
            AgentKind::Parent => "PARENT",
            AgentKind::Child => "CHILD",
        }
    }

    /// Depth in the hierarchy: Router 0, Department 1, Specialist 2.
    pub fn depth(&self) -> u8 {
        match self {
            AgentKind::Router => 0,
            AgentKind::Parent => 1,
            AgentKind::Child => 2,
        }
    }

    /// The kind an agent's parent must have, if any.
    pub fn parent_kind(&self) -> Option<AgentKind> {
        match self {
            AgentKind::Router => None,
            AgentKind::Parent => Some(AgentKind::Router),
            AgentKind::Child => Some(AgentKind::Parent),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AppError;

    /// Accepts the current names and the legacy `PAI` / `FILHO` spellings.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ROUTER" => Ok(AgentKind::Router),
            "PARENT" | "PAI" => Ok(AgentKind::Parent),
            "CHILD" | "FILHO" => Ok(AgentKind::Child),
            other => Err(AppError::InvalidInput(format!("unknown agent kind '{}'", other))),
        }
    }
}

/// Per-agent generation settings. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Replaces the generic instruction block placed before the persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Returned to the user when generation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
}

/// How a tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[serde(alias = "DATABASE")]
    Database,
    #[serde(alias = "API")]
    Api,
    #[serde(alias = "WEBHOOK")]
    Webhook,
    #[serde(alias = "SUBFLOW", alias = "GENKIT_FLOW", alias = "genkit_flow")]
    Subflow,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Database => "database",
            ToolKind::Api => "api",
            ToolKind::Webhook => "webhook",
            ToolKind::Subflow => "subflow",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "database" => Ok(ToolKind::Database),
            "api" => Ok(ToolKind::Api),
            "webhook" => Ok(ToolKind::Webhook),
            "subflow" | "genkit_flow" => Ok(ToolKind::Subflow),
            other => Err(AppError::InvalidInput(format!("unknown tool kind '{}'", other))),
        }
    }
}

/// A named capability an agent may invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: ObjectId,
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    /// JSON schema of the parameters the model must supply.
    pub parameters: serde_json::Value,
    /// Kind-specific execution settings (table, endpoint, url, flow name...).
    pub config: serde_json::Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            description: description.into(),
            kind,
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
            config: serde_json::json!({}),
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Association between an agent and a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub tool: Tool,
    pub is_active: bool,
    /// Per-binding override merged over `tool.config` at execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl ToolBinding {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            is_active: true,
            config: None,
        }
    }
}

/// A node in the agent tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub persona: Option<String>,
    pub kind: AgentKind,
    pub scope_id: ScopeId,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<ObjectId>,
    pub is_active: bool,
    /// Lower value wins when ranking candidates.
    pub priority: i32,
    #[serde(default)]
    pub config: Option<GenerationConfig>,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
}

impl Agent {
    /// A router for `scope`. Routers have no parent.
    pub fn router(scope: &ScopeId, name: impl Into<String>, persona: impl Into<String>) -> Self {
        Self::blank(AgentKind::Router, scope.clone(), name.into(), persona.into())
    }

    /// A department placed under `router`.
    pub fn department(
        router: &Agent,
        organization_id: impl Into<String>,
        name: impl Into<String>,
        persona: impl Into<String>,
    ) -> Self {
        let mut agent = Self::blank(
            AgentKind::Parent,
            router.scope_id.clone(),
            name.into(),
            persona.into(),
        );
        agent.parent_id = Some(router.id.clone());
        agent.organization_id = Some(organization_id.into());
        agent
    }

    /// A specialist placed under `department`; inherits its scope and organization.
    pub fn specialist(
        department: &Agent,
        name: impl Into<String>,
        persona: impl Into<String>,
    ) -> Self {
        let mut agent = Self::blank(
            AgentKind::Child,
            department.scope_id.clone(),
            name.into(),
            persona.into(),
        );
        agent.parent_id = Some(department.id.clone());
        agent.organization_id = department.organization_id.clone();
        agent
    }

    fn blank(kind: AgentKind, scope_id: ScopeId, name: String, persona: String) -> Self {
        Self {
            id: ObjectId::new(),
            name,
            persona: if persona.trim().is_empty() {
                None
            } else {
                Some(persona)
            },
            kind,
            scope_id,
            organization_id: None,
            parent_id: None,
            is_active: true,
            priority: 0,
            config: None,
            tools: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_tool(mut self, binding: ToolBinding) -> Self {
        self.tools.push(binding);
        self
    }

    /// Tool bindings that may be offered to the model.
    pub fn active_tools(&self) -> impl Iterator<Item = &ToolBinding> {
        self.tools.iter().filter(|binding| binding.is_active)
    }

    /// Persona text, if one is set and non-blank.
    pub fn persona_text(&self) -> Option<&str> {
        self.persona.as_deref().filter(|p| !p.trim().is_empty())
    }

    pub fn fallback_message(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.fallback_message.as_deref())
            .filter(|m| !m.trim().is_empty())
    }
}
