//! In-process knowledge store
//!
//! Brute-force cosine search over a chunk list. Suitable for the small persona
//! knowledge bases loaded from YAML at startup and for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use companion_core::{rank_chunks, KnowledgeChunk, KnowledgeStore, Result, RoleFilter, ScoredChunk};

use crate::embeddings::cosine_similarity;

#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    chunks: RwLock<HashMap<String, KnowledgeChunk>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(chunks: impl IntoIterator<Item = KnowledgeChunk>) -> Self {
        let store = Self::new();
        store.insert_all(chunks);
        store
    }

    /// Insert or replace by chunk id
    pub fn insert(&self, chunk: KnowledgeChunk) {
        self.chunks.write().insert(chunk.id.clone(), chunk);
    }

    pub fn insert_all(&self, chunks: impl IntoIterator<Item = KnowledgeChunk>) {
        let mut map = self.chunks.write();
        for chunk in chunks {
            map.insert(chunk.id.clone(), chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search(
        &self,
        embedding: &[f32],
        filter: &RoleFilter,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .read()
            .values()
            .filter(|chunk| filter.allows(&chunk.role_tags))
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(embedding, &chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();

        rank_chunks(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn chunk(id: &str, embedding: Vec<f32>, roles: &[&str]) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.to_string(),
            text: format!("text {}", id),
            embedding,
            role_tags: roles.iter().map(|r| r.to_string()).collect::<BTreeSet<_>>(),
            source: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let store = InMemoryKnowledgeStore::with_chunks([
            chunk("b", vec![1.0, 0.0], &["general"]),
            chunk("a", vec![1.0, 0.0], &["general"]),
            chunk("c", vec![0.0, 1.0], &["general"]),
            chunk("secret", vec![1.0, 0.0], &["owner"]),
        ]);

        let results = store
            .search(&[1.0, 0.0], &RoleFilter::new(["general"]), 2)
            .await
            .unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let all = store
            .search(&[1.0, 0.0], &RoleFilter::unrestricted(), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemoryKnowledgeStore::new();
        assert!(store.is_empty());
        let results = store
            .search(&[1.0], &RoleFilter::unrestricted(), 3)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
