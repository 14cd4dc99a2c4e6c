//! Tool execution, dispatched on [`ToolKind`].

use crate::hierarchy::{Tool, ToolKind};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs a tool with model-supplied parameters.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// `binding_config` is the agent's per-binding override, if any.
    async fn execute(
        &self,
        tool: &Tool,
        parameters: Value,
        binding_config: Option<Value>,
    ) -> Result<Value>;
}

/// Executes one kind of tool against an already-merged config.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, tool: &Tool, config: &Value, parameters: Value) -> Result<Value>;
}

/// Merge a binding override over a tool's config. Binding keys win.
///
/// Non-object values are replaced wholesale by the override.
pub fn merge_config(base: &Value, overlay: Option<&Value>) -> Value {
    match (base, overlay) {
        (_, None) | (_, Some(Value::Null)) => base.clone(),
        (Value::Object(base), Some(Value::Object(overlay))) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Some(overlay)) => overlay.clone(),
    }
}

/// Deserialize a merged config into a handler's typed settings.
pub fn parse_config<T: serde::de::DeserializeOwned>(tool: &Tool, config: &Value) -> Result<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| AppError::Tool(format!("invalid config for tool '{}': {}", tool.name, e)))
}

/// Check that every required field is present and non-empty.
pub fn require_fields(tool: &Tool, parameters: &Value, required: &[String]) -> Result<()> {
    for field in required {
        let present = match parameters.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(AppError::Tool(format!(
                "missing required parameter '{}' for tool '{}'",
                field, tool.name
            )));
        }
    }
    Ok(())
}

/// The default [`ToolExecutor`]: one registered handler per tool kind.
#[derive(Default, Clone)]
pub struct KindToolExecutor {
    handlers: HashMap<ToolKind, Arc<dyn ToolHandler>>,
}

impl KindToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, kind: ToolKind, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn register(&mut self, kind: ToolKind, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn has_handler(&self, kind: ToolKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[async_trait]
impl ToolExecutor for KindToolExecutor {
    async fn execute(
        &self,
        tool: &Tool,
        parameters: Value,
        binding_config: Option<Value>,
    ) -> Result<Value> {
        let handler = self.handlers.get(&tool.kind).ok_or_else(|| {
            AppError::Tool(format!(
                "no handler registered for {} tool '{}'",
                tool.kind, tool.name
            ))
        })?;

        let config = merge_config(&tool.config, binding_config.as_ref());
        tracing::debug!(tool = %tool.name, kind = %tool.kind, "Executing tool");
        handler.run(tool, &config, parameters).await
    }
}

/// Built-in tool definitions installed by `provision`.
pub fn system_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            crate::hierarchy::DEFAULT_PRODUCT_TOOL,
            "Search the product catalogue by name, description or category",
            ToolKind::Database,
        )
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to look for" }
            },
            "required": ["query"]
        }))
        .with_config(serde_json::json!({
            "action": "search",
            "table": "products",
            "search_fields": ["name", "description", "category"],
            "return_fields": ["id", "name", "description", "price", "category", "stock"]
        })),
        Tool::new("checkOrderStatus", "Check the status of an order", ToolKind::Database)
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "customer_phone": { "type": "string" },
                    "tracking_code": { "type": "string" }
                }
            }))
            .with_config(serde_json::json!({
                "action": "search",
                "table": "orders",
                "search_fields": ["id", "customer_phone", "tracking_code"],
                "return_fields": ["id", "status", "tracking_code", "estimated_delivery", "items"]
            })),
        Tool::new("createTicket", "Open a technical support ticket", ToolKind::Database)
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "customer_phone": { "type": "string" },
                    "subject": { "type": "string" },
                    "description": { "type": "string" },
                    "priority": { "type": "string", "enum": ["low", "medium", "high"] }
                },
                "required": ["customer_phone", "subject", "description", "priority"]
            }))
            .with_config(serde_json::json!({
                "action": "create",
                "table": "support_tickets",
                "required_fields": ["customer_phone", "subject", "description", "priority"]
            })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn run(&self, _tool: &Tool, config: &Value, parameters: Value) -> Result<Value> {
            Ok(json!({ "config": config, "parameters": parameters }))
        }
    }

    #[test]
    fn test_merge_config_binding_wins() {
        let base = json!({"method": "GET", "endpoint": "https://a"});
        let merged = merge_config(&base, Some(&json!({"method": "POST"})));
        assert_eq!(merged, json!({"method": "POST", "endpoint": "https://a"}));
        assert_eq!(merge_config(&base, None), base);
        assert_eq!(merge_config(&base, Some(&Value::Null)), base);
    }

    #[test]
    fn test_require_fields() {
        let tool = Tool::new("t", "t", ToolKind::Api);
        let required = vec!["name".to_string()];
        assert!(require_fields(&tool, &json!({"name": "x"}), &required).is_ok());
        assert!(require_fields(&tool, &json!({"name": " "}), &required).is_err());
        assert!(require_fields(&tool, &json!({}), &required).is_err());
    }

    #[tokio::test]
    async fn test_dispatches_by_kind_with_merged_config() {
        let executor = KindToolExecutor::new().with_handler(ToolKind::Api, Arc::new(Echo));
        let tool = Tool::new("lookup", "Look up", ToolKind::Api).with_config(json!({"a": 1, "b": 1}));

        let result = executor
            .execute(&tool, json!({"q": "x"}), Some(json!({"b": 2})))
            .await
            .unwrap();
        assert_eq!(result["config"], json!({"a": 1, "b": 2}));
        assert_eq!(result["parameters"]["q"], "x");
    }

    #[tokio::test]
    async fn test_missing_handler_is_tool_error() {
        let executor = KindToolExecutor::new();
        let tool = Tool::new("hook", "Hook", ToolKind::Webhook);
        let err = executor.execute(&tool, json!({}), None).await.unwrap_err();
        assert!(matches!(err, AppError::Tool(_)));
    }

    #[test]
    fn test_system_tools_names() {
        let names: Vec<String> = system_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["searchProducts", "checkOrderStatus", "createTicket"]);
    }
}
