//! TOML-based configuration for switchboard
//!
//! Settings for logging, the database, the LLM provider, the flow and the
//! conversation history live in one TOML file (`switchboard.toml`). Every
//! section and field has a default, so an empty file is a valid config.
//!
//! # Hot Reloading
//!
//! Configuration changes are automatically detected and applied at runtime.
//! Use `ConfigManager` for thread-safe access to the current configuration.

use crate::agents::{FlowSettings, RefinementPolicy};
use crate::db::DatabaseProvider;
use crate::llm::{Provider, ToolCallingConfig};
use crate::memory::HistoryLimits;
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from switchboard.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local database path, or `:memory:`
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Environment variable for Turso URL (optional cloud config)
    pub turso_url_env: Option<String>,

    /// Environment variable for Turso auth token
    pub turso_token_env: Option<String>,
}

fn default_database_url() -> String {
    "./data/switchboard.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            turso_url_env: None,
            turso_token_env: None,
        }
    }
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// `openai` (any compatible gateway) or `ollama`
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    #[serde(default)]
    pub parallel_tools: bool,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_tool_iterations() -> usize {
    7
}

fn default_tool_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_llm_timeout(),
            max_tool_iterations: default_max_tool_iterations(),
            parallel_tools: false,
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

// ============= Flow Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_timeout")]
    pub log_timeout_secs: u64,

    #[serde(default)]
    pub refinement: RefinementPolicy,
}

fn default_request_timeout() -> u64 {
    120
}

fn default_log_timeout() -> u64 {
    5
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            log_timeout_secs: default_log_timeout(),
            refinement: RefinementPolicy::default(),
        }
    }
}

// ============= History Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    #[serde(default = "default_history_ttl")]
    pub ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_messages() -> usize {
    crate::memory::DEFAULT_MAX_MESSAGES
}

fn default_max_conversations() -> usize {
    10_000
}

fn default_history_ttl() -> u64 {
    24 * 60 * 60
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: default_max_messages(),
            max_conversations: default_max_conversations(),
            ttl_secs: default_history_ttl(),
        }
    }
}

// ============= Tools Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout for `api` and `webhook` tool requests
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl SwitchboardConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SwitchboardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.llm.provider.trim().to_ascii_lowercase().as_str() {
            "openai" | "ollama" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "llm.provider must be 'openai' or 'ollama', got '{}'",
                    other
                )))
            }
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("llm.model must not be empty".into()));
        }

        let positive = [
            ("llm.request_timeout_secs", self.llm.request_timeout_secs),
            ("llm.tool_timeout_secs", self.llm.tool_timeout_secs),
            ("flow.request_timeout_secs", self.flow.request_timeout_secs),
            ("flow.log_timeout_secs", self.flow.log_timeout_secs),
            ("tools.http_timeout_secs", self.tools.http_timeout_secs),
            ("history.ttl_secs", self.history.ttl_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{} must be greater than 0", name)));
            }
        }
        if self.llm.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "llm.max_tool_iterations must be greater than 0".into(),
            ));
        }
        if self.history.max_messages == 0 || self.history.max_conversations == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_messages and history.max_conversations must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable by name
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok().filter(|v| !v.is_empty())
    }

    /// The LLM provider, with the API key taken from `llm.api_key_env`.
    ///
    /// The key is required for `openai` unless the base URL points at a
    /// local gateway.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        let api_key = self.resolve_env(&self.llm.api_key_env);
        let is_openai = self.llm.provider.trim().eq_ignore_ascii_case("openai");
        let is_local = self.llm.base_url.contains("localhost") || self.llm.base_url.contains("127.0.0.1");
        if is_openai && api_key.is_none() && !is_local {
            return Err(ConfigError::MissingEnvVar(self.llm.api_key_env.clone()));
        }
        Provider::from_settings(&self.llm.provider, &self.llm.base_url, &self.llm.model, api_key)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    pub fn database_provider(&self) -> DatabaseProvider {
        let turso_url = self
            .database
            .turso_url_env
            .as_deref()
            .and_then(|name| self.resolve_env(name));
        match turso_url {
            Some(url) => self.database_provider_for(&url),
            None => DatabaseProvider::from_url(&self.database.url, None),
        }
    }

    /// Provider for an explicit URL, e.g. `--database`. Remote URLs take their
    /// token from `database.turso_token_env`.
    pub fn database_provider_for(&self, url: &str) -> DatabaseProvider {
        DatabaseProvider::from_url(url, self.turso_token())
    }

    pub fn turso_token(&self) -> Option<String> {
        self.database
            .turso_token_env
            .as_deref()
            .and_then(|name| self.resolve_env(name))
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }

    pub fn tool_calling(&self) -> ToolCallingConfig {
        ToolCallingConfig {
            max_iterations: self.llm.max_tool_iterations,
            parallel_execution: self.llm.parallel_tools,
            tool_timeout: Duration::from_secs(self.llm.tool_timeout_secs),
            ..Default::default()
        }
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            request_timeout: Duration::from_secs(self.flow.request_timeout_secs),
            log_timeout: Duration::from_secs(self.flow.log_timeout_secs),
            refinement: self.flow.refinement,
        }
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            max_messages: self.history.max_messages,
            max_conversations: self.history.max_conversations,
            ttl: Duration::from_secs(self.history.ttl_secs),
        }
    }

    pub fn http_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.http_timeout_secs)
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Quiet period after a file event before the file is re-read.
const RELOAD_SETTLE: Duration = Duration::from_millis(200);

/// Shared view of a config file that follows edits to it.
///
/// Readers take [`ConfigManager::config`] once per unit of work. A reload swaps
/// in a new `Arc`, so comparing with `Arc::ptr_eq` tells a reader it changed.
pub struct ConfigManager {
    current: Arc<ArcSwap<SwitchboardConfig>>,
    path: PathBuf,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Watch events carry absolute paths.
        let path = std::path::absolute(path.as_ref())?;
        let config = SwitchboardConfig::load(&path)?;

        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path,
            watcher: Mutex::new(None),
        })
    }

    /// Current configuration (lockless read)
    pub fn config(&self) -> Arc<SwitchboardConfig> {
        self.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file now. Returns whether the configuration changed; an
    /// invalid file is an error and leaves the current value in place.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        swap_if_changed(&self.current, &self.path)
    }

    /// Reload in the background whenever the file changes on disk.
    ///
    /// Needs a tokio runtime. Watching ends when the manager is dropped.
    pub fn watch(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == file_name.as_deref());
                if ours && (event.kind.is_modify() || event.kind.is_create()) {
                    let _ = tx.send(());
                }
            }
            Err(e) => error!(error = %e, "Config watcher error"),
        })?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        *self.watcher.lock() = Some(watcher);

        let current = Arc::clone(&self.current);
        let path = self.path.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Editors save in bursts of events.
                tokio::time::sleep(RELOAD_SETTLE).await;
                while rx.try_recv().is_ok() {}

                if let Err(e) = swap_if_changed(&current, &path) {
                    warn!(error = %e, "Ignoring invalid configuration change");
                }
            }
        });

        info!(path = %self.path.display(), "Watching configuration file");
        Ok(())
    }
}

fn swap_if_changed(current: &ArcSwap<SwitchboardConfig>, path: &Path) -> Result<bool, ConfigError> {
    let config = SwitchboardConfig::load(path)?;
    if **current.load() == config {
        return Ok(false);
    }
    current.store(Arc::new(config));
    info!(path = %path.display(), "Configuration reloaded");
    Ok(true)
}
