//! Database tool handler over a libsql connection.
//!
//! Supports three actions on a configured table:
//!
//! - `search`: `LIKE` match over `search_fields`, returns `return_fields`, at most 10 rows
//! - `create`: insert the parameters after checking `required_fields`
//! - `update`: update the row whose `key_field` (default `id`) matches
//!
//! Table and column names come from tool config and model output, so every
//! identifier is validated before it reaches SQL; values are always bound.

use super::executor::{parse_config, require_fields, ToolHandler};
use crate::hierarchy::Tool;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use libsql::{Connection, Value as SqlValue};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Maximum rows returned by a search.
pub const SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Search,
    Create,
    Update,
}

#[derive(Debug, Deserialize)]
struct DatabaseConfig {
    table: String,
    #[serde(default = "default_action")]
    action: Action,
    #[serde(default, alias = "searchFields")]
    search_fields: Vec<String>,
    #[serde(default, alias = "returnFields")]
    return_fields: Vec<String>,
    #[serde(default, alias = "requiredFields")]
    required_fields: Vec<String>,
    #[serde(default = "default_key_field", alias = "keyField")]
    key_field: String,
}

fn default_action() -> Action {
    Action::Search
}

fn default_key_field() -> String {
    "id".to_string()
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn identifier<'a>(tool: &Tool, name: &'a str) -> Result<&'a str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(AppError::Tool(format!(
            "invalid identifier '{}' in tool '{}'",
            name, tool.name
        )))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn as_object<'a>(tool: &Tool, parameters: &'a Value) -> Result<&'a Map<String, Value>> {
    parameters.as_object().ok_or_else(|| {
        AppError::Tool(format!("tool '{}' expects an object of parameters", tool.name))
    })
}

/// Runs `database` tools.
#[derive(Clone)]
pub struct DatabaseToolHandler {
    conn: Connection,
}

impl DatabaseToolHandler {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn search(&self, tool: &Tool, config: &DatabaseConfig, parameters: &Value) -> Result<Value> {
        let table = identifier(tool, &config.table)?;
        let generic = parameters
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty());

        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for field in &config.search_fields {
            let field = identifier(tool, field)?;
            let needle = match parameters.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => match generic {
                    Some(q) => q.to_string(),
                    None => continue,
                },
            };
            clauses.push(format!("CAST({} AS TEXT) LIKE ?", field));
            values.push(SqlValue::Text(format!("%{}%", needle)));
        }

        if clauses.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let columns = if config.return_fields.is_empty() {
            "*".to_string()
        } else {
            config
                .return_fields
                .iter()
                .map(|f| identifier(tool, f))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };

        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT {}",
            columns,
            table,
            clauses.join(" OR "),
            SEARCH_LIMIT
        );
        let mut rows = self
            .conn
            .query(&sql, values)
            .await
            .map_err(|e| AppError::Tool(format!("search in '{}' failed: {}", table, e)))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut object = Map::new();
            for idx in 0..row.column_count() {
                let name = row.column_name(idx).unwrap_or_default().to_string();
                object.insert(name, to_json(row.get_value(idx)?));
            }
            results.push(Value::Object(object));
        }
        Ok(Value::Array(results))
    }

    async fn create(&self, tool: &Tool, config: &DatabaseConfig, parameters: &Value) -> Result<Value> {
        let table = identifier(tool, &config.table)?;
        require_fields(tool, parameters, &config.required_fields)?;
        let fields = as_object(tool, parameters)?;
        if fields.is_empty() {
            return Err(AppError::Tool(format!("tool '{}' received no fields to insert", tool.name)));
        }

        let mut columns = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            columns.push(identifier(tool, name)?);
            values.push(to_sql(value));
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders
        );
        self.conn
            .execute(&sql, values)
            .await
            .map_err(|e| AppError::Tool(format!("insert into '{}' failed: {}", table, e)))?;

        let mut created = fields.clone();
        created.insert("rowid".to_string(), Value::from(self.conn.last_insert_rowid()));
        Ok(Value::Object(created))
    }

    async fn update(&self, tool: &Tool, config: &DatabaseConfig, parameters: &Value) -> Result<Value> {
        let table = identifier(tool, &config.table)?;
        let key = identifier(tool, &config.key_field)?;
        require_fields(tool, parameters, &config.required_fields)?;
        let fields = as_object(tool, parameters)?;
        let key_value = fields
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| AppError::Tool(format!("tool '{}' requires '{}' to update", tool.name, key)))?;

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for (name, value) in fields.iter().filter(|(name, _)| name.as_str() != key) {
            assignments.push(format!("{} = ?", identifier(tool, name)?));
            values.push(to_sql(value));
        }
        if assignments.is_empty() {
            return Err(AppError::Tool(format!("tool '{}' received no fields to update", tool.name)));
        }
        values.push(to_sql(key_value));

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            table,
            assignments.join(", "),
            key
        );
        let updated = self
            .conn
            .execute(&sql, values)
            .await
            .map_err(|e| AppError::Tool(format!("update of '{}' failed: {}", table, e)))?;

        Ok(serde_json::json!({ "updated": updated }))
    }
}

#[async_trait]
impl ToolHandler for DatabaseToolHandler {
    async fn run(&self, tool: &Tool, config: &Value, parameters: Value) -> Result<Value> {
        let config: DatabaseConfig = parse_config(tool, config)?;
        match config.action {
            Action::Search => self.search(tool, &config, &parameters).await,
            Action::Create => self.create(tool, &config, &parameters).await,
            Action::Update => self.update(tool, &config, &parameters).await,
        }
    }
}
