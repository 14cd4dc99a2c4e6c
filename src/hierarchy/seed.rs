//! Declarative hierarchy seeding and default provisioning.
//!
//! A seed file describes tools and one or more scopes:
//!
//! ```toml
//! [[tools]]
//! name = "searchProducts"
//! description = "Search the product catalogue"
//! kind = "database"
//! parameters = { type = "object", properties = { query = { type = "string" } }, required = ["query"] }
//! config = { action = "search", table = "products", search_fields = ["name"], return_fields = ["name", "price"] }
//!
//! [[scopes]]
//! id = "instance-1"
//!
//! [scopes.router]
//! name = "Front Desk"
//! persona = "You are the main assistant of Acme."
//!
//! [[scopes.departments]]
//! name = "Sales"
//! persona = "Handles purchases and quotes."
//! priority = 1
//!
//! [[scopes.departments.specialists]]
//! name = "Product Assistant"
//! persona = "You help customers find products."
//! tools = ["searchProducts"]
//! ```

use super::{Agent, GenerationConfig, ObjectId, ScopeId, Tool, ToolKind};
use crate::db::HierarchyStore;
use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Name of the tool bound to the default product specialist.
pub const DEFAULT_PRODUCT_TOOL: &str = "searchProducts";

const DEFAULT_ORGANIZATION: &str = "Default";

/// IDs produced by [`provision_default`].
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultStructure {
    pub router: ObjectId,
    pub department: ObjectId,
    pub specialist: ObjectId,
    /// Whether the scope already had a router.
    pub reused_router: bool,
}

/// Build the starter structure for a scope.
///
/// Reuses the scope's active router when there is one. The specialist is
/// bound to [`DEFAULT_PRODUCT_TOOL`] when that tool is registered.
pub async fn provision_default(
    store: &dyn HierarchyStore,
    scope: &ScopeId,
    instance_name: &str,
) -> Result<DefaultStructure> {
    let (router, reused_router) = match store.get_router(scope).await? {
        Some(router) => (router, true),
        None => {
            let router = Agent::router(
                scope,
                format!("{} Router", instance_name),
                format!(
                    "You are the main assistant of {}. Route each message to the department best suited to answer it.",
                    instance_name
                ),
            );
            store.insert_agent(router.clone()).await?;
            (router, false)
        }
    };

    let department = Agent::department(
        &router,
        DEFAULT_ORGANIZATION,
        "General Support",
        "General customer support: greetings, questions about products and services.",
    );
    store.insert_agent(department.clone()).await?;

    let specialist = Agent::specialist(
        &department,
        "Product Assistant",
        "You help customers find products, compare options and check prices.",
    );
    store.insert_agent(specialist.clone()).await?;

    match store.find_tool(DEFAULT_PRODUCT_TOOL).await? {
        Some(tool) => store.bind_tool(&specialist.id, &tool.id, None).await?,
        None => tracing::warn!(
            tool = DEFAULT_PRODUCT_TOOL,
            "Default tool not registered; specialist provisioned without tools"
        ),
    }

    tracing::info!(
        scope = %scope,
        router = %router.id,
        reused_router,
        "Provisioned default hierarchy"
    );

    Ok(DefaultStructure {
        router: router.id,
        department: department.id,
        specialist: specialist.id,
        reused_router,
    })
}

/// Root of a seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchySpec {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub scopes: Vec<ScopeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    #[serde(default = "empty_parameters")]
    pub parameters: serde_json::Value,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn empty_parameters() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// A tool reference: either a bare name or a name with a binding override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingSpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        config: Option<serde_json::Value>,
    },
}

impl BindingSpec {
    pub fn name(&self) -> &str {
        match self {
            BindingSpec::Name(name) => name,
            BindingSpec::Detailed { name, .. } => name,
        }
    }

    fn config(&self) -> Option<serde_json::Value> {
        match self {
            BindingSpec::Name(_) => None,
            BindingSpec::Detailed { config, .. } => config.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeSpec {
    pub id: ScopeId,
    pub router: AgentSpec,
    #[serde(default)]
    pub departments: Vec<DepartmentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub config: Option<GenerationConfig>,
    #[serde(default)]
    pub tools: Vec<BindingSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentSpec {
    #[serde(flatten)]
    pub agent: AgentSpec,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default)]
    pub specialists: Vec<AgentSpec>,
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

/// Counts of what [`HierarchySpec::apply`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub tools: usize,
    pub agents: usize,
    pub bindings: usize,
    pub reused_routers: usize,
}

impl HierarchySpec {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let spec: HierarchySpec = toml::from_str(content)
            .map_err(|e| AppError::Configuration(format!("Invalid seed file: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!("Failed to read seed file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Structural checks that do not need the store.
    pub fn validate(&self) -> Result<()> {
        let mut tool_names = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(AppError::Configuration("tool name must not be empty".to_string()));
            }
            if !tool_names.insert(tool.name.as_str()) {
                return Err(AppError::Configuration(format!(
                    "tool '{}' is declared twice",
                    tool.name
                )));
            }
        }

        let mut scopes = HashSet::new();
        for scope in &self.scopes {
            if !scopes.insert(scope.id.as_str()) {
                return Err(AppError::Configuration(format!(
                    "scope '{}' is declared twice",
                    scope.id
                )));
            }
            let agents = std::iter::once(&scope.router).chain(
                scope
                    .departments
                    .iter()
                    .flat_map(|d| std::iter::once(&d.agent).chain(d.specialists.iter())),
            );
            for agent in agents {
                if agent.name.trim().is_empty() {
                    return Err(AppError::Configuration(format!(
                        "scope '{}' has an agent without a name",
                        scope.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Write the tools and agents to a store.
    ///
    /// Tools are upserted by name. A scope that already has an active router
    /// keeps it and only gains the declared departments.
    pub async fn apply(&self, store: &dyn HierarchyStore) -> Result<SeedReport> {
        self.validate()?;
        let mut report = SeedReport::default();
        let mut tool_ids: HashMap<String, ObjectId> = HashMap::new();

        for spec in &self.tools {
            let tool = Tool::new(&spec.name, &spec.description, spec.kind)
                .with_parameters(spec.parameters.clone())
                .with_config(spec.config.clone());
            let id = store.upsert_tool(tool).await?;
            tool_ids.insert(spec.name.clone(), id);
            report.tools += 1;
        }

        for scope in &self.scopes {
            let router = match store.get_router(&scope.id).await? {
                Some(existing) => {
                    tracing::info!(scope = %scope.id, router = %existing.id, "Reusing existing router");
                    report.reused_routers += 1;
                    existing
                }
                None => {
                    let router = build(
                        Agent::router(&scope.id, &scope.router.name, &scope.router.persona),
                        &scope.router,
                    );
                    store.insert_agent(router.clone()).await?;
                    report.agents += 1;
                    report.bindings +=
                        bind_all(store, &router.id, &scope.router.tools, &mut tool_ids).await?;
                    router
                }
            };

            for dept_spec in &scope.departments {
                let department = build(
                    Agent::department(
                        &router,
                        &dept_spec.organization,
                        &dept_spec.agent.name,
                        &dept_spec.agent.persona,
                    ),
                    &dept_spec.agent,
                );
                store.insert_agent(department.clone()).await?;
                report.agents += 1;
                report.bindings +=
                    bind_all(store, &department.id, &dept_spec.agent.tools, &mut tool_ids).await?;

                for spec in &dept_spec.specialists {
                    let specialist = build(
                        Agent::specialist(&department, &spec.name, &spec.persona),
                        spec,
                    );
                    store.insert_agent(specialist.clone()).await?;
                    report.agents += 1;
                    report.bindings +=
                        bind_all(store, &specialist.id, &spec.tools, &mut tool_ids).await?;
                }
            }
        }

        tracing::info!(
            tools = report.tools,
            agents = report.agents,
            bindings = report.bindings,
            "Seed applied"
        );
        Ok(report)
    }
}

fn build(agent: Agent, spec: &AgentSpec) -> Agent {
    let agent = agent.with_priority(spec.priority);
    match &spec.config {
        Some(config) => agent.with_config(config.clone()),
        None => agent,
    }
}

async fn bind_all(
    store: &dyn HierarchyStore,
    agent_id: &ObjectId,
    bindings: &[BindingSpec],
    known: &mut HashMap<String, ObjectId>,
) -> Result<usize> {
    for binding in bindings {
        let tool_id = match known.get(binding.name()) {
            Some(id) => id.clone(),
            None => {
                let tool = store.find_tool(binding.name()).await?.ok_or_else(|| {
                    AppError::Configuration(format!("unknown tool '{}'", binding.name()))
                })?;
                known.insert(tool.name.clone(), tool.id.clone());
                tool.id
            }
        };
        store.bind_tool(agent_id, &tool_id, binding.config()).await?;
    }
    Ok(bindings.len())
}
