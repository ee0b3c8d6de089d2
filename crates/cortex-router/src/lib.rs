pub mod error;
pub mod probes;

use std::collections::HashMap;
use std::sync::Arc;

use cortex_core::types::{IntentCategory, ModelRole, RouteDecision, ThinkingMode, UserProfile, Verbosity};
use cortex_embedding::{cosine_similarity, EmbeddingService};
use cortex_reflection::{complexity_threshold_key, AdaptiveThresholds};
use tracing::{debug, warn};

pub use error::{Result, RouterError};

/// Classifies each request into an intent category and selects
/// model+thinking-mode+system-prompt fragments (spec C4 Semantic Router).
pub struct SemanticRouter {
    embedding: Arc<EmbeddingService>,
    probes: HashMap<IntentCategory, Vec<f32>>,
    min_confidence: f32,
    /// EMA-tuned per-category confidence floors (spec §4.12); shared with
    /// the Metrics Recorder, which is the only writer.
    thresholds: Arc<AdaptiveThresholds>,
}

impl SemanticRouter {
    /// Embeds the default probe phrase set once; probe vectors are the
    /// mean of each category's phrase embeddings.
    pub async fn new(embedding: Arc<EmbeddingService>, min_confidence: f32, thresholds: Arc<AdaptiveThresholds>) -> Result<Self> {
        let mut probes = HashMap::new();
        for (category, phrases) in probes::default_probe_phrases() {
            let mut sum: Option<Vec<f32>> = None;
            for phrase in &phrases {
                let v = embedding.embed(phrase).await?;
                sum = Some(match sum {
                    Some(mut acc) => {
                        for (a, b) in acc.iter_mut().zip(v.iter()) {
                            *a += b;
                        }
                        acc
                    }
                    None => v,
                });
            }
            if let Some(mut acc) = sum {
                let n = phrases.len() as f32;
                for x in acc.iter_mut() {
                    *x /= n;
                }
                probes.insert(category, acc);
            }
        }
        Ok(Self {
            embedding,
            probes,
            min_confidence,
            thresholds,
        })
    }

    /// `route(query, user_profile, has_image) -> (RouteDecision, query_embedding)`.
    /// The embedding is returned so downstream components (Context Primer)
    /// reuse it instead of issuing a second embedding call (spec §4.4, §9).
    pub async fn route(
        &self,
        query: &str,
        user_profile: Option<&UserProfile>,
        has_image: bool,
    ) -> (RouteDecision, Option<Vec<f32>>) {
        let embedding = match self.embedding.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %e, "embedding unavailable during routing, using keyword fallback");
                let category = probes::keyword_category(query);
                let decision = self.decision_for(category, 0.4, user_profile, has_image);
                return (decision, None);
            }
        };

        let mut best: Option<(IntentCategory, f32)> = None;
        for category in IntentCategory::ALL {
            if let Some(probe) = self.probes.get(&category) {
                let sim = cosine_similarity(&embedding, probe);
                best = Some(match best {
                    Some((best_cat, best_sim)) if best_sim >= sim => (best_cat, best_sim),
                    _ => (category, sim),
                });
            }
        }

        let (category, confidence) = best.unwrap_or((IntentCategory::Quick, self.min_confidence));
        debug!(%category, confidence, "semantic router classified query");

        let decision = self.decision_for(category, confidence, user_profile, has_image);
        (decision, Some(embedding))
    }

    fn decision_for(
        &self,
        category: IntentCategory,
        confidence: f32,
        user_profile: Option<&UserProfile>,
        has_image: bool,
    ) -> RouteDecision {
        // A non-Quick category that doesn't clear its EMA-tuned confidence
        // floor routes down to Quick instead (spec §4.12 "routing complexity
        // thresholds"); the floor itself only moves on recorded outcomes, so
        // a query that's genuinely ambiguous settles toward the cheap path.
        let floor = self.thresholds.get(&complexity_threshold_key(category));
        let category = if has_image {
            IntentCategory::Vision
        } else if category != IntentCategory::Quick && confidence < floor {
            debug!(%category, confidence, floor, "confidence below adaptive threshold, routing to Quick");
            IntentCategory::Quick
        } else {
            category
        };

        let (model_role, mut thinking_mode) = match category {
            IntentCategory::Quick => (ModelRole::Small, ThinkingMode::Fast),
            IntentCategory::Reasoning => (ModelRole::Large, ThinkingMode::Deep),
            IntentCategory::Code => (ModelRole::Large, ThinkingMode::Standard),
            IntentCategory::Creative => (ModelRole::Large, ThinkingMode::Standard),
            IntentCategory::Vision => (ModelRole::Vision, ThinkingMode::Standard),
        };

        let brief = matches!(
            user_profile.map(|p| p.verbosity),
            Some(Verbosity::Brief)
        );
        if brief && !matches!(category, IntentCategory::Reasoning | IntentCategory::Code) {
            thinking_mode = ThinkingMode::Fast;
        }

        RouteDecision {
            category,
            model_role,
            thinking_mode,
            system_prompt_fragment: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::config::EmbeddingConfig;
    use cortex_gateway::{BackendError, ChatRequest, ChatResponse, LlmBackend, Message, ModelGateway};
    use std::collections::HashMap as StdHashMap;

    struct FakeBackend;

    #[async_trait::async_trait]
    impl LlmBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }
        async fn chat(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, BackendError> {
            unimplemented!()
        }
        async fn embed(&self, text: &str, _model: &str) -> std::result::Result<Vec<f32>, BackendError> {
            // deterministic pseudo-embedding: bucket by a couple of keywords
            let mut v = vec![0.0f32; 8];
            let lower = text.to_lowercase();
            for (i, word) in lower.split_whitespace().enumerate() {
                let bucket = (word.len() + i) % v.len();
                v[bucket] += 1.0;
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

    async fn test_router() -> SemanticRouter {
        let mut backends: StdHashMap<_, std::sync::Arc<dyn LlmBackend>> = StdHashMap::new();
        backends.insert(cortex_core::types::ModelRole::Embedding, std::sync::Arc::new(FakeBackend));
        let gateway = ModelGateway::new(
            backends,
            StdHashMap::from([(cortex_core::types::ModelRole::Embedding, "fake-embed".to_string())]),
            cortex_core::config::ModelsConfig::default(),
        );
        let embedding = std::sync::Arc::new(EmbeddingService::new(
            std::sync::Arc::new(gateway),
            &EmbeddingConfig {
                dim: 8,
                ..EmbeddingConfig::default()
            },
        ));
        let thresholds = std::sync::Arc::new(AdaptiveThresholds::new(StdHashMap::new(), 0.2, 20, 0.5));
        SemanticRouter::new(embedding, 0.5, thresholds).await.unwrap()
    }

    #[tokio::test]
    async fn low_confidence_non_quick_category_downgrades_to_quick() {
        let router = test_router().await;
        let decision = router.decision_for(IntentCategory::Reasoning, 0.1, None, false);
        assert_eq!(decision.category, IntentCategory::Quick);
    }

    #[tokio::test]
    async fn confidence_above_floor_keeps_the_routed_category() {
        let router = test_router().await;
        let decision = router.decision_for(IntentCategory::Reasoning, 0.9, None, false);
        assert_eq!(decision.category, IntentCategory::Reasoning);
    }

    #[tokio::test]
    async fn route_returns_query_embedding() {
        let router = test_router().await;
        let (decision, embedding) = router.route("hello there", None, false).await;
        assert!(embedding.is_some());
        assert!(decision.confidence >= 0.0 && decision.confidence <= 1.0);
    }

    #[tokio::test]
    async fn has_image_forces_vision() {
        let router = test_router().await;
        let (decision, _) = router.route("look at this", None, true).await;
        assert_eq!(decision.category, IntentCategory::Vision);
        assert_eq!(decision.model_role, ModelRole::Vision);
    }

    #[tokio::test]
    async fn routing_is_deterministic() {
        let router = test_router().await;
        let (d1, _) = router.route("write a function to sort", None, false).await;
        let (d2, _) = router.route("write a function to sort", None, false).await;
        assert_eq!(d1.category, d2.category);
        assert_eq!(d1.model_role, d2.model_role);
    }

    #[tokio::test]
    async fn brief_profile_downgrades_thinking_mode_outside_reasoning_and_code() {
        let router = test_router().await;
        let profile = UserProfile {
            verbosity: Verbosity::Brief,
            ..UserProfile::default()
        };
        let (decision, _) = router.route("compose a poem", Some(&profile), false).await;
        if !matches!(decision.category, IntentCategory::Reasoning | IntentCategory::Code) {
            assert_eq!(decision.thinking_mode, ThinkingMode::Fast);
        }
    }
}
