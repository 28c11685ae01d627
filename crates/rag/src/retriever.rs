//! Retrieval Manager
//!
//! Embeds the query, searches the knowledge store with a role filter and renders
//! the top chunks into a single context string.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use companion_config::{EmbeddingKind, KnowledgeBackend, RagConfig};
use companion_core::{rank_chunks, Embedder, Error, KnowledgeStore, Result, RoleFilter};

use crate::embeddings::HashEmbedder;
use crate::knowledge_loader::KnowledgeLoader;
use crate::memory_store::InMemoryKnowledgeStore;
use crate::ollama_embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
use crate::vector_store::{QdrantKnowledgeStore, VectorStoreConfig};
use crate::RagError;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Chunks scoring below this are dropped
    pub min_score: f32,
    /// Joins rendered chunks
    pub separator: String,
    /// Bound on embed + search
    pub timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            separator: "\n---\n".to_string(),
            timeout: Duration::from_secs(8),
        }
    }
}

impl From<&RagConfig> for RetrieverConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            min_score: config.min_score,
            separator: config.separator.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// Rendered retrieval result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieved {
    /// Chunks joined by the separator, most similar first; empty when nothing matched
    pub context: String,
    /// Distinct chunk sources in context order
    pub sources: Vec<String>,
}

impl Retrieved {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

pub struct RetrievalManager {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn KnowledgeStore>,
    config: RetrieverConfig,
}

impl RetrievalManager {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn KnowledgeStore>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    /// Build the embedder and store from configuration and ingest `knowledge_path`
    pub async fn from_config(config: &RagConfig) -> std::result::Result<Self, RagError> {
        let embedder: Arc<dyn Embedder> = match config.embedding.kind {
            EmbeddingKind::Hash => Arc::new(HashEmbedder::new(config.embedding.dim)),
            EmbeddingKind::Ollama => Arc::new(OllamaEmbedder::new(OllamaEmbeddingConfig {
                endpoint: config.embedding.endpoint.clone(),
                model: config.embedding.model.clone(),
                embedding_dim: config.embedding.dim,
                timeout: Duration::from_millis(config.timeout_ms),
            })?),
        };

        let chunks = match config.knowledge_path.as_deref() {
            Some(path) => KnowledgeLoader::load_path(Path::new(path), embedder.as_ref()).await?,
            None => Vec::new(),
        };

        let store: Arc<dyn KnowledgeStore> = match config.backend {
            KnowledgeBackend::Memory => Arc::new(InMemoryKnowledgeStore::with_chunks(chunks)),
            KnowledgeBackend::Qdrant => {
                let store = QdrantKnowledgeStore::new(VectorStoreConfig {
                    endpoint: config.qdrant.endpoint.clone(),
                    collection: config.qdrant.collection.clone(),
                    vector_dim: config.embedding.dim,
                    api_key: config.qdrant.api_key.clone(),
                })?;
                if !chunks.is_empty() {
                    store.ensure_collection().await?;
                    store.upsert(&chunks).await?;
                }
                Arc::new(store)
            }
        };

        tracing::info!(
            store = store.name(),
            embedder = embedder.model_name(),
            "Retrieval manager ready"
        );

        Ok(Self::new(embedder, store, RetrieverConfig::from(config)))
    }

    /// Top `k` chunks allowed by `filter`, rendered into a context string
    ///
    /// Fails with `RetrievalUnavailable` when embedding or search fails or exceeds the
    /// configured timeout.
    pub async fn retrieve(&self, query: &str, filter: &RoleFilter, k: usize) -> Result<Retrieved> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Retrieved::default());
        }

        let search = async {
            let embedding = self.embedder.embed(query).await?;
            self.store.search(&embedding, filter, k).await
        };

        let mut chunks = tokio::time::timeout(self.config.timeout, search)
            .await
            .map_err(|_| {
                Error::RetrievalUnavailable(format!(
                    "{} timed out after {}ms",
                    self.store.name(),
                    self.config.timeout.as_millis()
                ))
            })??;

        chunks.retain(|c| c.score >= self.config.min_score && filter.allows(&c.chunk.role_tags));
        rank_chunks(&mut chunks);
        chunks.truncate(k);

        let mut sources: Vec<String> = Vec::new();
        let rendered: Vec<String> = chunks
            .iter()
            .map(|c| {
                if !c.chunk.source.is_empty() && !sources.contains(&c.chunk.source) {
                    sources.push(c.chunk.source.clone());
                }
                if c.chunk.source.is_empty() {
                    c.chunk.text.clone()
                } else {
                    format!("[{}] {}", c.chunk.source, c.chunk.text)
                }
            })
            .collect();

        tracing::debug!(
            chunks = rendered.len(),
            roles = ?filter.roles().collect::<Vec<_>>(),
            "Retrieved context"
        );

        Ok(Retrieved {
            context: rendered.join(&self.config.separator),
            sources,
        })
    }
}
