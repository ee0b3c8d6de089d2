use std::sync::Arc;

use cortex_core::config::ReflectionConfig;
use cortex_errormemory::ErrorMemory;
use cortex_memory::MemoryStore;

use crate::error::Result;
use crate::recorder::MetricsRecorder;

const RECENT_CORRECTIONS_LIMIT: usize = 3;
const TOP_SUCCESS_PATTERNS_LIMIT: usize = 2;

/// Assembles the small system-prompt block the Conductor prepends before a
/// request's real work begins (spec C8 Self-Reflection Builder).
pub struct SelfReflectionBuilder {
    recorder: Arc<MetricsRecorder>,
    memory: Arc<MemoryStore>,
    error_memory: Arc<ErrorMemory>,
    trend_days: i64,
}

impl SelfReflectionBuilder {
    pub fn new(recorder: Arc<MetricsRecorder>, memory: Arc<MemoryStore>, error_memory: Arc<ErrorMemory>, config: &ReflectionConfig) -> Self {
        Self {
            recorder,
            memory,
            error_memory,
            trend_days: config.trend_days,
        }
    }

    /// Gathers today's metrics, the trend comparison, recent corrections,
    /// top success patterns, and the current positive streak, then renders
    /// a fixed-structure block. Any sub-query with no data omits its
    /// sub-block; if everything is empty, returns an empty string (spec
    /// §4.8). Never fails the request — PREPARE-stage failures in this
    /// component degrade to a missing sub-block instead of propagating
    /// (spec §7).
    pub async fn build_prompt(&self, include_motivation: bool) -> Result<String> {
        let today = self.recorder.get_metrics()?;
        let trend = self.recorder.get_metrics_as_of(self.trend_days)?;
        let corrections = self.error_memory.recent_corrections(RECENT_CORRECTIONS_LIMIT).unwrap_or_default();
        let patterns = self.memory.get_top_success_patterns(TOP_SUCCESS_PATTERNS_LIMIT).unwrap_or_default();
        let streak = self.recorder.positive_streak_length()?;

        let mut sections: Vec<String> = Vec::new();

        if today.iq.score > 0.0 || today.empathy.score > 0.0 {
            let mut stats = format!("Current IQ {:.2}, Empathy {:.2}.", today.iq.score, today.empathy.score);
            if let Some(t) = &trend {
                let iq_delta = today.iq.score - t.iq.score;
                let empathy_delta = today.empathy.score - t.empathy.score;
                stats.push_str(&format!(
                    " Compared to {} days ago: IQ {}, Empathy {}.",
                    self.trend_days,
                    signed_trend(iq_delta),
                    signed_trend(empathy_delta),
                ));
            }
            sections.push(stats);
        }

        if !corrections.is_empty() {
            let mut block = String::from("Past mistakes to avoid:");
            for c in &corrections {
                block.push_str(&format!("\n- ({}) {}", c.category, truncate(&c.user_correction, 160)));
            }
            sections.push(block);
        }

        if !patterns.is_empty() {
            let mut block = String::from("Working patterns that have worked well:");
            for p in &patterns {
                block.push_str(&format!("\n- {}", truncate(&p.pattern_text, 160)));
            }
            sections.push(block);
        }

        if include_motivation {
            if let Some(sentence) = motivational_sentence(streak, &today, trend.as_ref()) {
                sections.push(sentence);
            }
        }

        Ok(sections.join("\n\n"))
    }
}

fn signed_trend(delta: f32) -> String {
    if delta > 0.01 {
        format!("up {:.2}", delta)
    } else if delta < -0.01 {
        format!("down {:.2}", delta.abs())
    } else {
        "flat".to_string()
    }
}

/// Rule-based motivational sentence chosen from streak length and metric
/// trend (spec §4.8 "one motivational sentence chosen by rule from the
/// metric trend"). Returns `None` when there's nothing to say yet.
fn motivational_sentence(
    streak: u32,
    today: &cortex_core::types::MetricsSnapshot,
    trend: Option<&cortex_core::types::MetricsSnapshot>,
) -> Option<String> {
    if streak >= 10 {
        return Some(format!("You're on a {streak}-response positive streak — keep this approach."));
    }
    if let Some(t) = trend {
        if today.iq.score > t.iq.score && today.empathy.score > t.empathy.score {
            return Some("Both IQ and Empathy are trending up — stay consistent.".to_string());
        }
        if today.iq.score < t.iq.score || today.empathy.score < t.empathy.score {
            return Some("Recent scores dipped — favor the patterns that scored well before.".to_string());
        }
    }
    if today.iq.score > 0.0 || today.empathy.score > 0.0 {
        return Some("Keep prioritizing accurate, well-fitted responses.".to_string());
    }
    None
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "…"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::config::EmbeddingConfig;
    use cortex_core::types::InteractionOutcome;
    use cortex_gateway::{BackendError, ChatRequest, ChatResponse, LlmBackend, ModelGateway};
    use rusqlite::Connection;
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
            let mut v = vec![0.0f32; 8];
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

    fn gateway() -> Arc<ModelGateway> {
        let mut backends: HashMap<_, Arc<dyn LlmBackend>> = HashMap::new();
        backends.insert(cortex_core::types::ModelRole::Embedding, Arc::new(FakeBackend) as Arc<dyn LlmBackend>);
        Arc::new(ModelGateway::new(
            backends,
            HashMap::from([(cortex_core::types::ModelRole::Embedding, "fake-embed".to_string())]),
            cortex_core::config::ModelsConfig::default(),
        ))
    }

    fn test_builder() -> (SelfReflectionBuilder, Arc<MetricsRecorder>) {
        let gw = gateway();
        let embedding = Arc::new(cortex_embedding::EmbeddingService::new(
            gw.clone(),
            &EmbeddingConfig { dim: 8, ..EmbeddingConfig::default() },
        ));

        let mem_conn = Connection::open_in_memory().unwrap();
        cortex_memory::db::init_db(&mem_conn).unwrap();
        let privacy = cortex_memory::PrivacyLock::new(1800);
        let memory = Arc::new(MemoryStore::new(mem_conn, gw.clone(), embedding.clone(), privacy));

        let err_conn = Connection::open_in_memory().unwrap();
        cortex_errormemory::db::init_db(&err_conn).unwrap();
        let error_memory = Arc::new(ErrorMemory::new(err_conn, embedding));

        let refl_conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&refl_conn).unwrap();
        let thresholds = crate::thresholds::AdaptiveThresholds::new(HashMap::new(), 0.2, 20, 0.5);
        let recorder = Arc::new(MetricsRecorder::new(refl_conn, thresholds));

        let config = ReflectionConfig::default();
        let builder = SelfReflectionBuilder::new(recorder.clone(), memory, error_memory, &config);
        (builder, recorder)
    }

    #[tokio::test]
    async fn empty_state_yields_empty_prompt() {
        let (builder, _recorder) = test_builder();
        let prompt = builder.build_prompt(true).await.unwrap();
        assert!(prompt.is_empty());
    }

    #[tokio::test]
    async fn includes_stats_and_motivation_once_outcomes_exist() {
        let (builder, recorder) = test_builder();
        for i in 0..3 {
            recorder
                .record(InteractionOutcome {
                    message_id: i,
                    category: cortex_core::types::IntentCategory::Quick,
                    was_correction: false,
                    implicit_positive: true,
                    implicit_negative: false,
                    facts_in_context: 2,
                    style_prompt_length: 20,
                    confidence_score: 0.8,
                    latency_ms: 400,
                    tokens_generated: 30,
                })
                .unwrap();
        }
        let prompt = builder.build_prompt(true).await.unwrap();
        assert!(prompt.contains("IQ"));
    }
}
