pub mod cache;
pub mod error;

use std::sync::Arc;

use cortex_core::config::EmbeddingConfig;
use cortex_gateway::ModelGateway;
use tracing::debug;

use cache::EmbeddingCache;
pub use error::{EmbeddingError, Result};

/// Deduplicated, LRU+TTL-cached text→vector mapping shared by all
/// consumers (spec C2 Embedding Service).
pub struct EmbeddingService {
    gateway: Arc<ModelGateway>,
    cache: EmbeddingCache,
    dim: usize,
}

impl EmbeddingService {
    pub fn new(gateway: Arc<ModelGateway>, config: &EmbeddingConfig) -> Self {
        Self {
            gateway,
            cache: EmbeddingCache::new(config.cache_capacity, config.cache_ttl_secs),
            dim: config.dim,
        }
    }

    /// Configured embedding dimensionality; used by Memory Store and Error
    /// Memory to validate stored vectors (spec §3 Fact invariant).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed `text`, serving from cache when possible and coalescing
    /// concurrent identical requests into one backend call.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = EmbeddingCache::key_for(text);

        if let Some(cached) = self.cache.get(key).await {
            debug!(len = text.len(), "embedding cache hit");
            return Ok(cached);
        }

        let gateway = self.gateway.clone();
        let text_owned = text.to_string();
        let vector = self
            .cache
            .coalesce(key, || async move {
                gateway
                    .embed(&text_owned)
                    .await
                    .map_err(|e| EmbeddingError::Unavailable(e.to_string()))
            })
            .await?;

        if vector.len() != self.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }

        self.cache.put(key, vector.clone()).await;
        Ok(vector)
    }
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for
/// zero-magnitude vectors rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.7071];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
