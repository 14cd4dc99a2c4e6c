//! Configuration loading and hot reload.

pub mod toml_config;

pub use toml_config::{ConfigError, ConfigManager, LogFormat, SwitchboardConfig};
