//! Text Embeddings
//!
//! Deterministic feature-hashing embedder. Needs no model or external service, so it
//! backs development setups and tests; the same scheme must be used for ingestion and
//! queries.

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use companion_core::{Embedder, Result};

/// Signed feature hashing over lower-cased words, L2-normalized
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Synchronous embedding, used by the loader and tests
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];

        for word in text.unicode_words() {
            let hash = fnv1a(word.to_lowercase().as_bytes());
            let idx = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(PRIME))
}

pub(crate) fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(64);
        let embedding = embedder.embed_sync("MeiLin thích âm nhạc");

        assert_eq!(embedding.len(), 64);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_hash_embedder_deterministic_and_case_insensitive() {
        let embedder = HashEmbedder::default();
        assert_eq!(embedder.embed_sync("Xin Chào"), embedder.embed_sync("xin chào"));
    }

    #[test]
    fn test_similarity_prefers_overlap() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed_sync("bài hát yêu thích");
        let close = embedder.embed_sync("bài hát yêu thích của em là Hoa Nở");
        let far = embedder.embed_sync("thời tiết hôm nay");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8);
        let embedding = embedder.embed_sync("  ");
        assert!(embedding.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&embedding, &embedding), 0.0);
    }
}
