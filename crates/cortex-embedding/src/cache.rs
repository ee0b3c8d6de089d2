use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OnceCell};

use crate::error::{EmbeddingError, Result};

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

type InFlight = Arc<OnceCell<std::result::Result<Vec<f32>, String>>>;

/// Bounded cache keyed by text hash, LRU-by-age eviction on capacity,
/// TTL expiry checked at lookup (spec §4.2). Concurrent requests for the
/// same text coalesce into a single backend call via an in-flight map of
/// `OnceCell`s (spec "Single-flight caches").
pub struct EmbeddingCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    capacity: usize,
    ttl: std::time::Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            capacity,
            ttl: std::time::Duration::from_secs(ttl_secs),
        }
    }

    pub fn key_for(text: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Return the cached vector for `key` if present and not TTL-expired.
    pub async fn get(&self, key: u64) -> Option<Vec<f32>> {
        let mut entries = self.entries.lock().await;
        let expired = entries
            .get(&key)
            .map(|e| e.inserted_at.elapsed() >= self.ttl)
            .unwrap_or(false);
        if expired {
            entries.remove(&key);
            return None;
        }
        entries.get(&key).map(|e| e.vector.clone())
    }

    pub async fn put(&self, key: u64, vector: Vec<f32>) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| *k)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Run `compute` at most once per in-flight key: the first caller for a
    /// given text computes the embedding, concurrent callers for the same
    /// text await its result instead of dispatching their own request.
    pub async fn coalesce<F, Fut>(&self, key: u64, compute: F) -> Result<Vec<f32>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<f32>>>,
    {
        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| async { compute().await.map_err(|e| e.to_string()) })
            .await
            .clone();

        // Remove the in-flight entry once resolved so a future cache-miss
        // (e.g. after TTL expiry) starts a fresh coalescing group.
        self.in_flight.lock().await.remove(&key);

        result.map_err(EmbeddingError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = EmbeddingCache::new(16, 3600);
        let key = EmbeddingCache::key_for("hello");
        cache.put(key, vec![1.0, 2.0, 3.0]).await;
        assert_eq!(cache.get(key).await, Some(vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let cache = EmbeddingCache::new(2, 3600);
        let k1 = EmbeddingCache::key_for("a");
        let k2 = EmbeddingCache::key_for("b");
        let k3 = EmbeddingCache::key_for("c");
        cache.put(k1, vec![1.0]).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.put(k2, vec![2.0]).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.put(k3, vec![3.0]).await;

        assert!(cache.get(k1).await.is_none());
        assert!(cache.get(k2).await.is_some());
        assert!(cache.get(k3).await.is_some());
    }

    #[tokio::test]
    async fn coalesces_concurrent_identical_requests() {
        let cache = Arc::new(EmbeddingCache::new(16, 3600));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let key = EmbeddingCache::key_for("dedup me");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .coalesce(key, || async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(vec![9.0])
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), vec![9.0]);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
