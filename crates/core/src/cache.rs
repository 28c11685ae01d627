//! Response cache entries

use serde::{Deserialize, Serialize};

/// Precomputed response for a normalized trigger
///
/// Content is immutable once stored; only `hit_count` changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub trigger_key: String,
    /// Reference into the artifact store
    pub audio_ref: String,
    /// Spoken text of the artifact
    pub text: String,
    #[serde(default)]
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(
        trigger_key: impl Into<String>,
        audio_ref: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            trigger_key: trigger_key.into(),
            audio_ref: audio_ref.into(),
            text: text.into(),
            hit_count: 0,
        }
    }
}
