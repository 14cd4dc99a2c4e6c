//! Named sub-flows runnable as tools.
//!
//! A `subflow` tool's config names the flow to run (`flow_name`); the
//! [`SubflowHandler`] looks it up in a [`SubflowRegistry`] and passes the
//! model's parameters through.

use super::executor::{parse_config, ToolHandler};
use crate::hierarchy::Tool;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A host-provided routine invoked by name.
#[async_trait]
pub trait Subflow: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, input: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct SubflowRegistry {
    flows: HashMap<String, Arc<dyn Subflow>>,
}

impl SubflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, flow: Arc<dyn Subflow>) {
        self.flows.insert(flow.name().to_string(), flow);
    }

    pub async fn run(&self, name: &str, input: Value) -> Result<Value> {
        match self.flows.get(name) {
            Some(flow) => flow.run(input).await,
            None => Err(AppError::Tool(format!("Subflow not found: {}", name))),
        }
    }

    /// Registered flow names, sorted.
    pub fn flow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flows.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_flow(&self, name: &str) -> bool {
        self.flows.contains_key(name)
    }
}

#[derive(Debug, Deserialize)]
struct SubflowConfig {
    #[serde(alias = "flowName")]
    flow_name: String,
}

/// Runs `subflow` tools through a registry.
#[derive(Clone)]
pub struct SubflowHandler {
    registry: Arc<SubflowRegistry>,
}

impl SubflowHandler {
    pub fn new(registry: Arc<SubflowRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolHandler for SubflowHandler {
    async fn run(&self, tool: &Tool, config: &Value, parameters: Value) -> Result<Value> {
        let config: SubflowConfig = parse_config(tool, config)?;
        self.registry.run(&config.flow_name, parameters).await
    }
}
