//! Configuration management for the assistant
//!
//! Supports loading configuration from:
//! - TOML/YAML files under `config/`
//! - Environment variables (PARLEY__ prefix, `__` separator)

pub mod settings;

pub use settings::{
    load_settings, ObservabilityConfig, PersistenceConfig, RateLimitConfig, ResponseConfig,
    SegmenterConfig, ServerConfig, SessionConfig, Settings, SynthesisConfig, ToolsConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
