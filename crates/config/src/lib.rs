//! Configuration management for the incident-intelligence engine
//!
//! Supports loading configuration from:
//! - TOML/YAML files (`config/default`, `config/{env}`)
//! - Environment variables (`INCIDENT_INTEL` prefix, `__` separator)

pub mod settings;

pub use settings::{
    load_settings, CorpusConfig, EmbeddingBackend, EmbeddingConfig, GeneratorBackend,
    GeneratorConfig, ObservabilityConfig, RateLimitConfig, RetrievalConfig, RuntimeEnvironment,
    ServerConfig, Settings, VectorBackend, VectorIndexConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for incident_core::Error {
    fn from(err: ConfigError) -> Self {
        incident_core::Error::Config(err.to_string())
    }
}
