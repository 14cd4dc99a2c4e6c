//! API and webhook tool handlers.

use super::executor::{parse_config, require_fields, ToolHandler};
use crate::hierarchy::Tool;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ApiConfig {
    endpoint: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, alias = "requiredFields")]
    required_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Sends JSON requests for `api` and `webhook` tools.
#[derive(Clone)]
pub struct HttpToolHandler {
    client: Client,
    webhook: bool,
}

impl HttpToolHandler {
    /// Handler for `api` tools: parameters are the request body.
    pub fn api(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            webhook: false,
        })
    }

    /// Handler for `webhook` tools: parameters plus `triggeredAt`.
    pub fn webhook(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            webhook: true,
        })
    }

    async fn send(
        &self,
        tool: &Tool,
        url: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: Value,
    ) -> Result<Value> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| AppError::Tool(format!("invalid HTTP method '{}' for tool '{}'", method, tool.name)))?;

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        // GET requests carry parameters in the query string.
        request = if method == Method::GET {
            request.query(&query_pairs(&body))
        } else {
            request.json(&body)
        };

        let response = request.send().await.map_err(|e| {
            AppError::Tool(format!("request for tool '{}' failed: {}", tool.name, e))
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AppError::Tool(format!("failed to read response for tool '{}': {}", tool.name, e))
        })?;

        if !status.is_success() {
            return Err(AppError::Tool(format!(
                "tool '{}' returned {}: {}",
                tool.name, status, text
            )));
        }

        if text.trim().is_empty() {
            return Ok(serde_json::json!({ "status": status.as_u16() }));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

fn query_pairs(body: &Value) -> Vec<(String, String)> {
    match body {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl ToolHandler for HttpToolHandler {
    async fn run(&self, tool: &Tool, config: &Value, parameters: Value) -> Result<Value> {
        if self.webhook {
            let config: WebhookConfig = parse_config(tool, config)?;
            let mut body = match parameters {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("payload".to_string(), other);
                    map
                }
            };
            body.insert(
                "triggeredAt".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
            self.send(tool, &config.url, &config.method, &config.headers, Value::Object(body))
                .await
        } else {
            let config: ApiConfig = parse_config(tool, config)?;
            require_fields(tool, &parameters, &config.required_fields)?;
            self.send(tool, &config.endpoint, &config.method, &config.headers, parameters)
                .await
        }
    }
}
