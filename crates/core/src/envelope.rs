//! Per-turn response envelope

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Structured description of a terminal turn failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub code: String,
    pub message: String,
}

impl From<&Error> for TurnFailure {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of one `handle_turn` call, never persisted directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Always non-empty
    pub text: String,
    pub audio_ref: Option<String>,
    /// Text provider that produced `text`; `None` on cache hits and failures
    pub used_provider: Option<String>,
    pub used_cache: bool,
    pub latency_ms: u64,
    /// Set when the turn failed and `text` is the in-character fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
}

impl ResponseEnvelope {
    pub fn cached(text: impl Into<String>, audio_ref: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            text: text.into(),
            audio_ref: Some(audio_ref.into()),
            used_provider: None,
            used_cache: true,
            latency_ms,
            failure: None,
        }
    }

    pub fn failed(fallback_text: impl Into<String>, err: &Error, latency_ms: u64) -> Self {
        Self {
            text: fallback_text.into(),
            audio_ref: None,
            used_provider: None,
            used_cache: false,
            latency_ms,
            failure: Some(TurnFailure::from(err)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_envelope_serialization() {
        let err = Error::ProfileStoreUnavailable("down".to_string());
        let envelope = ResponseEnvelope::failed("Xin lỗi", &err, 12);
        assert!(envelope.is_failure());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["failure"]["code"], "profile_store_unavailable");
        assert_eq!(json["used_cache"], false);
    }

    #[test]
    fn test_success_envelope_omits_failure() {
        let envelope = ResponseEnvelope::cached("Em đây!", "wake.mp3", 1);
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("failure").is_none());
        assert_eq!(json["audio_ref"], "wake.mp3");
    }
}
