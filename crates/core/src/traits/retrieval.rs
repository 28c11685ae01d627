//! Retrieval traits

use async_trait::async_trait;

use crate::knowledge::{RoleFilter, ScoredChunk};
use crate::Result;

/// Dense embedding backend; must match the scheme used at ingestion time
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension
    fn dim(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Read contract over ingested knowledge
#[async_trait]
pub trait KnowledgeStore: Send + Sync + 'static {
    /// Up to `k` chunks allowed by `filter`, most similar first
    ///
    /// Fails with `Error::RetrievalUnavailable` when the backend cannot be reached.
    async fn search(
        &self,
        embedding: &[f32],
        filter: &RoleFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
