//! Error taxonomy shared by every crate in the workspace

use thiserror::Error;

use crate::provider::Capability;

/// Result alias over the core [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single provider attempt
///
/// Every variant feeds the registry's fallback loop; none of them is terminal on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the orchestration core
#[derive(Error, Debug)]
pub enum Error {
    /// Knowledge store unreachable; callers degrade to an empty context
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("All {attempts} {capability} providers exhausted")]
    AllProvidersExhausted {
        capability: Capability,
        attempts: usize,
    },

    #[error("A turn is already in progress for identity {0}")]
    TurnInProgress(String),

    #[error("Profile store unavailable: {0}")]
    ProfileStoreUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Stable machine-readable code, used in failure envelopes and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            Error::RetrievalUnavailable(_) => "retrieval_unavailable",
            Error::Provider { .. } => "provider_error",
            Error::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Error::TurnInProgress(_) => "turn_in_progress",
            Error::ProfileStoreUnavailable(_) => "profile_store_unavailable",
            Error::Persistence(_) => "persistence",
            Error::Config(_) => "config",
            Error::InvalidInput(_) => "invalid_input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::AllProvidersExhausted {
            capability: Capability::GenerateText,
            attempts: 3,
        };
        assert_eq!(err.code(), "all_providers_exhausted");
        assert_eq!(err.to_string(), "All 3 generate_text providers exhausted");

        let err = Error::Provider {
            provider: "ollama".to_string(),
            source: ProviderError::Timeout { after_ms: 500 },
        };
        assert!(err.to_string().contains("Timed out after 500ms"));
    }
}
