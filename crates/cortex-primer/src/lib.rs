pub mod cache;
pub mod error;
pub mod instructions;

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use cortex_core::config::PrimerConfig;
use cortex_core::types::{PrimedContext, PrimedMemory, RouteDecision, UserProfile};
use cortex_embedding::EmbeddingService;
use cortex_memory::MemoryStore;

use cache::PrimerCache;
pub use error::{PrimerError, Result};

/// How many relevant memories and success patterns to prefetch per category
/// (spec §4.5 "limit configurable per category"; a single constant here,
/// not yet split per category — no deployment has asked for different caps
/// across categories).
const MEMORY_LIMIT: usize = 5;
const SUCCESS_PATTERN_LIMIT: usize = 3;

/// Prefetches memories, success patterns, tool hints, and domain
/// instructions for a routed request, backed by a semantic cache of prior
/// primings (spec C5 Context Primer).
pub struct ContextPrimer {
    memory: Arc<MemoryStore>,
    embedding: Arc<EmbeddingService>,
    cache: PrimerCache,
}

impl ContextPrimer {
    pub fn new(memory: Arc<MemoryStore>, embedding: Arc<EmbeddingService>, config: &PrimerConfig, dim: usize) -> Self {
        Self {
            memory,
            embedding,
            cache: PrimerCache::new(config.cache_capacity, config.cache_ttl_secs, dim, config.cache_similarity_threshold),
        }
    }

    /// Builds the [`PrimedContext`] for a routed request, reusing
    /// `query_embedding` when the caller already computed one (spec §4.4
    /// "no second embedding call").
    pub async fn prime(
        &self,
        query: &str,
        route: &RouteDecision,
        _user_profile: &UserProfile,
        query_embedding: Option<Vec<f32>>,
    ) -> Result<PrimedContext> {
        let start = Instant::now();
        let query_embedding = match query_embedding {
            Some(e) => e,
            None => self.embedding.embed(query).await?,
        };

        if let Some(cached) = self.cache.lookup(&query_embedding) {
            debug!(category = %route.category, "context primer cache hit");
            return Ok(cached);
        }

        let memories: Vec<PrimedMemory> = self
            .memory
            .get_relevant_facts_by_embedding(&query_embedding, MEMORY_LIMIT)?
            .into_iter()
            .map(|f| PrimedMemory {
                content: f.content,
                category: f.category,
                confidence: f.confidence,
            })
            .collect();

        let success_patterns: Vec<String> = self
            .memory
            .get_success_patterns(route.category, SUCCESS_PATTERN_LIMIT)?
            .into_iter()
            .map(|p| p.pattern_text)
            .collect();

        let tool_hints = instructions::tool_hints(route.category);
        let instructions_fragment = instructions::instructions_fragment(route.category);

        let context = PrimedContext {
            category: route.category,
            memories,
            success_patterns,
            tool_hints,
            instructions_fragment,
            prime_time_ms: start.elapsed().as_millis() as u64,
            from_cache: false,
        };

        self.cache.insert(query_embedding, context.clone());
        Ok(context)
    }

    /// Invalidated when the Memory Store or Error Memory writes a record
    /// that could change what `category` should prime with (spec §9).
    pub fn invalidate_for_category(&self, category: cortex_core::types::IntentCategory) {
        self.cache.invalidate_for_category(category);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_version(&self) -> u64 {
        self.cache.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::config::EmbeddingConfig;
    use cortex_core::types::{FactCategory, IntentCategory, ModelRole, ThinkingMode};
    use cortex_gateway::{BackendError, ChatRequest, ChatResponse, LlmBackend, ModelGateway};
    use cortex_memory::PrivacyLock;
    use std::collections::HashMap;

    struct FakeBackend;

    #[async_trait]
    impl LlmBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }
        async fn chat(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, BackendError> {
            unimplemented!()
        }
        async fn embed(&self, text: &str, _model: &str) -> std::result::Result<Vec<f32>, BackendError> {
            let mut v = vec![0.0f32; 4];
            for (i, w) in text.to_lowercase().split_whitespace().enumerate() {
                v[(w.len() + i) % v.len()] += 1.0;
            }
            if v.iter().all(|x| *x == 0.0) {
                v[0] = 1.0;
            }
            Ok(v)
        }
        async fn list_loaded_models(&self) -> std::result::Result<Vec<String>, BackendError> {
            Ok(vec![])
        }
    }

    fn test_primer() -> (ContextPrimer, Arc<MemoryStore>) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        cortex_memory::db::init_db(&conn).unwrap();

        let mut backends: HashMap<_, Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert(ModelRole::Embedding, Arc::new(FakeBackend) as Arc<dyn LlmBackend>);
        let gateway = Arc::new(ModelGateway::new(
            backends,
            HashMap::from([(ModelRole::Embedding, "fake-embed".to_string())]),
            cortex_core::config::ModelsConfig::default(),
        ));
        let embed_config = EmbeddingConfig {
            dim: 4,
            ..EmbeddingConfig::default()
        };
        let embedding = Arc::new(EmbeddingService::new(gateway.clone(), &embed_config));
        let privacy = PrivacyLock::new(1800);
        let memory = Arc::new(MemoryStore::new(conn, gateway, embedding.clone(), privacy));

        let primer_config = PrimerConfig::default();
        let primer = ContextPrimer::new(memory.clone(), embedding, &primer_config, 4);
        (primer, memory)
    }

    fn route(category: IntentCategory) -> RouteDecision {
        RouteDecision {
            category,
            model_role: ModelRole::Small,
            thinking_mode: ThinkingMode::Fast,
            system_prompt_fragment: None,
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn prime_includes_relevant_memories_and_tool_hints() {
        let (primer, memory) = test_primer();
        memory
            .add_fact(None, "likes terse code reviews", FactCategory::Style, 0.8)
            .await
            .unwrap();

        let profile = UserProfile::default();
        let ctx = primer
            .prime("write a function", &route(IntentCategory::Code), &profile, None)
            .await
            .unwrap();

        assert_eq!(ctx.category, IntentCategory::Code);
        assert!(!ctx.from_cache);
        assert!(!ctx.tool_hints.is_empty());
        assert!(!ctx.instructions_fragment.is_empty());
    }

    #[tokio::test]
    async fn second_identical_query_hits_cache() {
        let (primer, _memory) = test_primer();
        let profile = UserProfile::default();
        let route = route(IntentCategory::Quick);

        let first = primer.prime("hello there", &route, &profile, None).await.unwrap();
        assert!(!first.from_cache);

        let second = primer.prime("hello there", &route, &profile, None).await.unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn invalidate_for_category_forces_a_fresh_prime() {
        let (primer, _memory) = test_primer();
        let profile = UserProfile::default();
        let route = route(IntentCategory::Quick);

        primer.prime("hello there", &route, &profile, None).await.unwrap();
        primer.invalidate_for_category(IntentCategory::Quick);
        let after = primer.prime("hello there", &route, &profile, None).await.unwrap();
        assert!(!after.from_cache);
    }
}
