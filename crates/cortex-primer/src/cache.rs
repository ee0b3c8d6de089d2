use std::sync::Mutex;
use std::time::{Duration, Instant};

use cortex_core::types::{IntentCategory, PrimedContext};

struct Entry {
    key_embedding: Vec<f32>,
    context: PrimedContext,
    category: IntentCategory,
    inserted_at: Instant,
}

struct State {
    entries: Vec<Entry>,
    /// Row-major `entries.len() x dim` matrix kept in lock-step with
    /// `entries` — rebuilt whenever the entry list changes so a lookup is a
    /// single pass over contiguous memory rather than per-entry dot products.
    matrix: Vec<f32>,
    version: u64,
}

impl State {
    fn rebuild_matrix(&mut self) {
        self.matrix.clear();
        for e in &self.entries {
            self.matrix.extend_from_slice(&e.key_embedding);
        }
    }
}

/// Semantic cache of prior [`PrimedContext`] results, keyed by query
/// embedding rather than text (spec §4.5, §9 cache invariants).
pub struct PrimerCache {
    state: Mutex<State>,
    capacity: usize,
    ttl: Duration,
    dim: usize,
    similarity_threshold: f32,
}

impl PrimerCache {
    pub fn new(capacity: usize, ttl_secs: u64, dim: usize, similarity_threshold: f32) -> Self {
        Self {
            state: Mutex::new(State {
                entries: Vec::new(),
                matrix: Vec::new(),
                version: 0,
            }),
            capacity,
            ttl: Duration::from_secs(ttl_secs),
            dim,
            similarity_threshold,
        }
    }

    /// Evicts TTL-expired entries, then returns the best match above the
    /// configured similarity threshold, if any.
    pub fn lookup(&self, query_embedding: &[f32]) -> Option<PrimedContext> {
        let mut state = self.state.lock().unwrap();
        self.evict_expired(&mut state);

        if state.entries.is_empty() || query_embedding.len() != self.dim {
            return None;
        }

        let mut best_idx = None;
        let mut best_sim = self.similarity_threshold;
        for (i, row) in self.matrix_rows(&state).enumerate() {
            let sim = dot(row, query_embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        best_idx.map(|i| {
            let mut ctx = state.entries[i].context.clone();
            ctx.from_cache = true;
            ctx
        })
    }

    /// Inserts a new priming, evicting the oldest entry first if the cache
    /// is at capacity, then rebuilds the similarity matrix.
    pub fn insert(&self, key_embedding: Vec<f32>, context: PrimedContext) {
        if key_embedding.len() != self.dim {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.entries.len() >= self.capacity && !state.entries.is_empty() {
            state.entries.remove(0);
        }
        state.entries.push(Entry {
            key_embedding,
            category: context.category,
            context,
            inserted_at: Instant::now(),
        });
        state.rebuild_matrix();
        state.version += 1;
    }

    /// Drops every cached entry whose category matches `category`.
    pub fn invalidate_for_category(&self, category: IntentCategory) {
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|e| e.category != category);
        state.rebuild_matrix();
        state.version += 1;
    }

    /// Drops keys and matrix together — never leaves them out of sync.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.matrix.clear();
        state.version += 1;
    }

    /// Monotonic counter bumped on every write; callers may compare to a
    /// previously-observed value to detect staleness (spec §9).
    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }

    fn evict_expired(&self, state: &mut State) {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = state.entries.len();
        state.entries.retain(|e| now.duration_since(e.inserted_at) < ttl);
        if state.entries.len() != before {
            state.rebuild_matrix();
        }
    }

    fn matrix_rows<'a>(&self, state: &'a State) -> impl Iterator<Item = &'a [f32]> + 'a {
        state.matrix.chunks_exact(self.dim)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
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

    fn sample_context(category: IntentCategory) -> PrimedContext {
        PrimedContext {
            category,
            memories: vec![],
            success_patterns: vec![],
            tool_hints: vec![],
            instructions_fragment: String::new(),
            prime_time_ms: 0,
            from_cache: false,
        }
    }

    #[test]
    fn hit_above_threshold_marks_from_cache() {
        let cache = PrimerCache::new(10, 3600, 3, 0.92);
        cache.insert(vec![1.0, 0.0, 0.0], sample_context(IntentCategory::Code));
        let hit = cache.lookup(&[1.0, 0.0, 0.0]);
        assert!(hit.is_some());
        assert!(hit.unwrap().from_cache);
    }

    #[test]
    fn miss_below_threshold_returns_none() {
        let cache = PrimerCache::new(10, 3600, 3, 0.92);
        cache.insert(vec![1.0, 0.0, 0.0], sample_context(IntentCategory::Code));
        let miss = cache.lookup(&[0.0, 1.0, 0.0]);
        assert!(miss.is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache = PrimerCache::new(1, 3600, 3, 0.92);
        cache.insert(vec![1.0, 0.0, 0.0], sample_context(IntentCategory::Code));
        cache.insert(vec![0.0, 1.0, 0.0], sample_context(IntentCategory::Creative));
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).is_none());
        assert!(cache.lookup(&[0.0, 1.0, 0.0]).is_some());
    }

    #[test]
    fn invalidate_for_category_drops_matching_entries_only() {
        let cache = PrimerCache::new(10, 3600, 3, 0.92);
        cache.insert(vec![1.0, 0.0, 0.0], sample_context(IntentCategory::Code));
        cache.insert(vec![0.0, 1.0, 0.0], sample_context(IntentCategory::Creative));
        cache.invalidate_for_category(IntentCategory::Code);
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).is_none());
        assert!(cache.lookup(&[0.0, 1.0, 0.0]).is_some());
    }

    #[test]
    fn version_bumps_on_write() {
        let cache = PrimerCache::new(10, 3600, 3, 0.92);
        let v0 = cache.version();
        cache.insert(vec![1.0, 0.0, 0.0], sample_context(IntentCategory::Code));
        assert!(cache.version() > v0);
    }

    #[test]
    fn clear_drops_keys_and_matrix_together() {
        let cache = PrimerCache::new(10, 3600, 3, 0.92);
        cache.insert(vec![1.0, 0.0, 0.0], sample_context(IntentCategory::Code));
        cache.clear();
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).is_none());
        assert_eq!(cache.state.lock().unwrap().matrix.len(), 0);
    }
}
