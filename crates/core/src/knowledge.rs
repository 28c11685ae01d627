//! Knowledge chunks and role filtering

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Embedded unit of knowledge, immutable once ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub role_tags: BTreeSet<String>,
    #[serde(default)]
    pub source: String,
}

/// Chunk paired with its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

/// Tag-based restriction on eligible chunks; an empty filter is unrestricted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleFilter(BTreeSet<String>);

impl RoleFilter {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(roles.into_iter().map(Into::into).collect())
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// True when the filter is empty or intersects `tags`
    pub fn allows(&self, tags: &BTreeSet<String>) -> bool {
        self.0.is_empty() || self.0.iter().any(|r| tags.contains(r))
    }
}

/// Order by similarity descending, ties broken by chunk id ascending
pub fn rank_chunks(chunks: &mut [ScoredChunk]) {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
