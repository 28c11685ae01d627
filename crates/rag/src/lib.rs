//! Knowledge retrieval
//!
//! Features:
//! - Deterministic hashing embedder plus Ollama dense embeddings
//! - In-memory brute-force store and Qdrant-backed store
//! - Role-filtered search with stable tie-breaking by chunk id
//! - YAML/JSON knowledge base loading
//! - Retrieval manager rendering chunks into prompt context

pub mod embeddings;
pub mod knowledge_loader;
pub mod memory_store;
pub mod ollama_embeddings;
pub mod retriever;
pub mod vector_store;

pub use embeddings::{cosine_similarity, HashEmbedder};
pub use knowledge_loader::{KnowledgeDocument, KnowledgeFile, KnowledgeLoader};
pub use memory_store::InMemoryKnowledgeStore;
pub use ollama_embeddings::{OllamaEmbedder, OllamaEmbeddingConfig};
pub use retriever::{RetrievalManager, RetrieverConfig, Retrieved};
pub use vector_store::{QdrantKnowledgeStore, VectorStoreConfig};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<RagError> for companion_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Index(msg) => companion_core::Error::Config(msg),
            other => companion_core::Error::RetrievalUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: companion_core::Error = RagError::Search("refused".into()).into();
        assert_eq!(err.code(), "retrieval_unavailable");

        let err: companion_core::Error = RagError::Index("bad yaml".into()).into();
        assert_eq!(err.code(), "config");
    }
}
