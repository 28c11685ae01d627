//! Response orchestration for the companion
//!
//! Features:
//! - Orchestration pipeline with per-identity turn serialization
//! - Response cache keyed by normalized trigger phrases
//! - Identity resolution with explicit pronoun confirmation
//! - Role-aware retrieval filters and persona prompt assembly
//! - Ambient behavior engine with personality modes and a background runner
//! - In-memory and filesystem stores for single-process deployments

pub mod ambient;
pub mod artifacts;
pub mod cache;
pub mod orchestrator;
pub mod profile;
pub mod prompt;
pub mod roles;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

pub use ambient::{
    AmbientBehavior, AmbientEngine, AmbientEvent, AmbientRunner, AmbientSnapshot, AmbientState,
    ModeStats, ModeSummary, WeightedBehavior,
};
pub use artifacts::{FsArtifactStore, InMemoryArtifactStore};
pub use cache::{InMemoryCacheStore, ResponseCache};
pub use orchestrator::{Orchestrator, PipelineComponents, PipelineConfig};
pub use profile::{InMemoryProfileStore, ProfileManager, ResolvedIdentity};
pub use prompt::{PromptAssembler, PromptInput};
pub use roles::RoleDetector;

use companion_config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Unknown ambient mode: {0}")]
    UnknownMode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<AgentError> for companion_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::UnknownMode(_) => companion_core::Error::InvalidInput(err.to_string()),
            AgentError::Config(msg) => companion_core::Error::Config(msg),
        }
    }
}
