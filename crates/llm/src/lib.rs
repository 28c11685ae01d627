//! Provider integrations and the capability registry
//!
//! Features:
//! - Text generation backends (Ollama, OpenAI-compatible, Azure OpenAI)
//! - Speech synthesis backends (OpenAI, ElevenLabs, generic HTTP)
//! - Rank-ordered fallback with per-capability timeouts and per-attempt outcomes
//! - Factory that builds the registry from configuration

pub mod backend;
pub mod factory;
pub mod registry;
pub mod speech;

pub use backend::{LlmConfig, OllamaBackend, OpenAIBackend, OpenAIConfig};
pub use factory::ProviderFactory;
pub use registry::{
    AttemptOutcome, Invocation, OutcomeSink, ProviderOutput, ProviderRegistry,
    ProviderRegistryBuilder, ProviderRequest, RecordingOutcomeSink, TracingOutcomeSink,
};
pub use speech::{ElevenLabsSpeech, HttpSpeech, OpenAISpeech, SpeechConfig};

use std::time::Duration;

use companion_core::{Capability, ProviderError};
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No {capability} provider named {name}")]
    ProviderNotFound { capability: Capability, name: String },
}

impl LlmError {
    /// Classify a transport error, keeping the configured timeout for context
    pub(crate) fn from_request(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            LlmError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for ProviderError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Api { status, message } => ProviderError::Api { status, message },
            LlmError::Network(msg) => ProviderError::Network(msg),
            LlmError::InvalidResponse(msg) => ProviderError::MalformedResponse(msg),
            LlmError::Timeout { after_ms } => ProviderError::Timeout { after_ms },
            LlmError::Configuration(msg) => ProviderError::Configuration(msg),
            LlmError::ProviderNotFound { name, .. } => ProviderError::Unavailable(name),
        }
    }
}

impl From<LlmError> for companion_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ProviderNotFound { .. } => companion_core::Error::InvalidInput(err.to_string()),
            LlmError::Configuration(msg) => companion_core::Error::Config(msg),
            other => companion_core::Error::Provider {
                provider: "unknown".to_string(),
                source: other.into(),
            },
        }
    }
}
