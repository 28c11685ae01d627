//! Knowledge store backed by Qdrant
//!
//! Chunks are stored with payload keys `chunk_id`, `text`, `source` and
//! `role_tags` (list). Point ids are UUID v5 derived from the chunk id so
//! re-ingesting a chunk overwrites it.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, r#match::MatchValue, value::Kind, Condition,
        CreateCollectionBuilder, Distance, FieldCondition, Filter, ListValue, Match, PointStruct,
        RepeatedStrings, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value,
        VectorParamsBuilder,
    },
    Qdrant,
};
use uuid::Uuid;

use companion_core::{rank_chunks, KnowledgeChunk, KnowledgeStore, RoleFilter, ScoredChunk};

use crate::RagError;

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Qdrant endpoint
    pub endpoint: String,
    /// Collection name
    pub collection: String,
    /// Vector dimension
    pub vector_dim: usize,
    /// API key (optional)
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:6334".to_string(),
            collection: "companion_knowledge".to_string(),
            vector_dim: 384,
            api_key: None,
        }
    }
}

pub struct QdrantKnowledgeStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl QdrantKnowledgeStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create collection if not exists
    pub async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;
            tracing::info!(collection = %self.config.collection, "Created Qdrant collection");
        }

        Ok(())
    }

    /// Insert or overwrite chunks; each chunk must carry its embedding
    pub async fn upsert(&self, chunks: &[KnowledgeChunk]) -> Result<(), RagError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = chunks
            .iter()
            .map(|chunk| {
                PointStruct::new(
                    point_id(&chunk.id),
                    chunk.embedding.clone(),
                    chunk_payload(chunk),
                )
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, points))
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for QdrantKnowledgeStore {
    async fn search(
        &self,
        embedding: &[f32],
        filter: &RoleFilter,
        k: usize,
    ) -> companion_core::Result<Vec<ScoredChunk>> {
        // Over-fetch so equal scores at the cut-off are resolved by chunk id
        let limit = (k * 2).max(k + 2) as u64;
        let mut builder =
            SearchPointsBuilder::new(&self.config.collection, embedding.to_vec(), limit)
                .with_payload(true);

        if let Some(f) = role_filter(filter) {
            builder = builder.filter(f);
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut chunks: Vec<ScoredChunk> = results.result.into_iter().map(scored_chunk).collect();
        rank_chunks(&mut chunks);
        chunks.truncate(k);
        Ok(chunks)
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}

fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn chunk_payload(chunk: &KnowledgeChunk) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("chunk_id".to_string(), chunk.id.clone().into());
    payload.insert("text".to_string(), chunk.text.clone().into());
    payload.insert("source".to_string(), chunk.source.clone().into());
    payload.insert(
        "role_tags".to_string(),
        Value {
            kind: Some(Kind::ListValue(ListValue {
                values: chunk.role_tags.iter().map(|t| t.clone().into()).collect(),
            })),
        },
    );
    payload
}

/// Match any of the filter's roles; `None` when unrestricted
fn role_filter(filter: &RoleFilter) -> Option<Filter> {
    if filter.is_unrestricted() {
        return None;
    }

    let condition = Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: "role_tags".to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keywords(RepeatedStrings {
                    strings: filter.roles().map(str::to_string).collect(),
                })),
            }),
            ..Default::default()
        })),
    };

    Some(Filter {
        must: vec![condition],
        ..Default::default()
    })
}

fn scored_chunk(point: ScoredPoint) -> ScoredChunk {
    let mut chunk = KnowledgeChunk {
        id: String::new(),
        text: String::new(),
        embedding: Vec::new(),
        role_tags: BTreeSet::new(),
        source: String::new(),
    };

    for (key, value) in point.payload {
        match (key.as_str(), value.kind) {
            ("chunk_id", Some(Kind::StringValue(s))) => chunk.id = s,
            ("text", Some(Kind::StringValue(s))) => chunk.text = s,
            ("source", Some(Kind::StringValue(s))) => chunk.source = s,
            ("role_tags", Some(Kind::ListValue(list))) => {
                chunk.role_tags = list
                    .values
                    .into_iter()
                    .filter_map(|v| match v.kind {
                        Some(Kind::StringValue(s)) => Some(s),
                        _ => None,
                    })
                    .collect();
            }
            _ => {}
        }
    }

    ScoredChunk {
        chunk,
        score: point.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = VectorStoreConfig::default();
        assert_eq!(config.vector_dim, 384);
        assert_eq!(config.collection, "companion_knowledge");
    }

    #[test]
    fn test_point_id_is_stable_uuid() {
        let a = point_id("persona_001");
        assert_eq!(a, point_id("persona_001"));
        assert_ne!(a, point_id("persona_002"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_role_filter_conversion() {
        assert!(role_filter(&RoleFilter::unrestricted()).is_none());

        let filter = role_filter(&RoleFilter::new(["general", "owner"])).unwrap();
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn test_payload_round_trip() {
        let chunk = KnowledgeChunk {
            id: "c1".to_string(),
            text: "MeiLin thích hát".to_string(),
            embedding: vec![0.1, 0.2],
            role_tags: ["general".to_string()].into_iter().collect(),
            source: "persona.yaml".to_string(),
        };

        let point = ScoredPoint {
            payload: chunk_payload(&chunk),
            score: 0.75,
            ..Default::default()
        };
        let scored = scored_chunk(point);

        assert_eq!(scored.chunk.id, "c1");
        assert_eq!(scored.chunk.source, "persona.yaml");
        assert!(scored.chunk.role_tags.contains("general"));
        assert_eq!(scored.score, 0.75);
    }
}
