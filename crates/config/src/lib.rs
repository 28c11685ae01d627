//! Configuration management for the companion
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default.*`, `config/{env}.*`)
//! - Environment variables (`COMPANION__` prefix, `__` separator)
//! - Side files for the persona and the ambient behavior catalog, with `${VAR}` expansion

pub mod ambient;
pub mod env;
pub mod persona;
pub mod settings;

pub use ambient::{AmbientCatalogConfig, BehaviorConfig, ModeConfig};
pub use env::substitute_env_vars;
pub use persona::{PersonaConfig, PronounConfig};
pub use settings::{
    load_settings, load_settings_from, AmbientConfig, CacheConfig, CachePreloadEntry,
    ConversationConfig, EmbeddingConfig, EmbeddingKind, KnowledgeBackend, ObservabilityConfig,
    PersistenceConfig, PronounRule, ProviderEntry, ProviderKind, ProvidersConfig, QdrantConfig,
    RagConfig, RuntimeEnvironment, ServerConfig, Settings,
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

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for companion_core::Error {
    fn from(err: ConfigError) -> Self {
        companion_core::Error::Config(err.to_string())
    }
}
