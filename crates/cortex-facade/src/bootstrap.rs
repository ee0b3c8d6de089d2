use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::info;

use cortex_conductor::{CognitiveConductor, SlotManager};
use cortex_core::config::CortexConfig;
use cortex_core::types::ModelRole;
use cortex_core::{CortexError, Result as CortexResult};
use cortex_embedding::EmbeddingService;
use cortex_errormemory::ErrorMemory;
use cortex_gateway::backend::LlmBackend;
use cortex_gateway::ollama::OllamaBackend;
use cortex_gateway::ModelGateway;
use cortex_memory::{MemoryStore, PrivacyLock};
use cortex_primer::ContextPrimer;
use cortex_reflection::{AdaptiveThresholds, MetricsRecorder, SelfReflectionBuilder};
use cortex_router::SemanticRouter;

use crate::core::CognitiveCore;

impl CognitiveCore {
    /// Wires up a complete core from a loaded [`CortexConfig`]: concrete
    /// Ollama-backed models, three independently-owned SQLite connections
    /// (memory, error memory, reflection), and the full dependency graph
    /// between every component. No HTTP server is started here — that is
    /// left entirely to whatever transport crate embeds this one.
    pub async fn bootstrap(config: CortexConfig) -> CortexResult<Self> {
        let mut backends: HashMap<ModelRole, Arc<dyn LlmBackend>> = HashMap::new();
        let mut model_names: HashMap<ModelRole, String> = HashMap::new();

        backends.insert(
            ModelRole::Small,
            Arc::new(OllamaBackend::new(config.models.small_base_url.clone())),
        );
        model_names.insert(ModelRole::Small, config.models.small_model.clone());

        backends.insert(
            ModelRole::Large,
            Arc::new(OllamaBackend::new(config.models.large_base_url.clone())),
        );
        model_names.insert(ModelRole::Large, config.models.large_model.clone());

        if let (Some(vision_base_url), Some(vision_model)) =
            (&config.models.vision_base_url, &config.models.vision_model)
        {
            backends.insert(ModelRole::Vision, Arc::new(OllamaBackend::new(vision_base_url.clone())));
            model_names.insert(ModelRole::Vision, vision_model.clone());
        }

        backends.insert(
            ModelRole::Embedding,
            Arc::new(OllamaBackend::new(config.embedding.base_url.clone())),
        );
        model_names.insert(ModelRole::Embedding, config.embedding.model.clone());

        let gateway = Arc::new(ModelGateway::new(backends, model_names, config.models.clone()));
        let embedding = Arc::new(EmbeddingService::new(gateway.clone(), &config.embedding));
        let privacy = PrivacyLock::new(config.privacy.idle_lock_secs);

        let db_root = Path::new(&config.database.path).parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(db_root) = db_root {
            std::fs::create_dir_all(db_root)?;
        }

        let memory_conn = open_connection(&component_db_path(&config.database.path, "memory"))?;
        let error_memory_conn = open_connection(&component_db_path(&config.database.path, "errormemory"))?;
        let reflection_conn = open_connection(&component_db_path(&config.database.path, "reflection"))?;

        cortex_memory::db::init_db(&memory_conn).map_err(|e| CortexError::Database(e.to_string()))?;
        cortex_errormemory::db::init_db(&error_memory_conn).map_err(|e| CortexError::Database(e.to_string()))?;
        cortex_reflection::db::init_db(&reflection_conn).map_err(|e| CortexError::Database(e.to_string()))?;

        let memory = Arc::new(MemoryStore::new(memory_conn, gateway.clone(), embedding.clone(), privacy.clone()));
        let error_memory = Arc::new(ErrorMemory::new(error_memory_conn, embedding.clone()));

        let thresholds = AdaptiveThresholds::new(
            HashMap::new(),
            config.reflection.threshold_ema_alpha,
            config.reflection.feedback_window,
            config.reflection.rollback_negative_fraction,
        );
        let recorder = Arc::new(MetricsRecorder::new(reflection_conn, thresholds));
        let reflection = Arc::new(SelfReflectionBuilder::new(
            recorder.clone(),
            memory.clone(),
            error_memory.clone(),
            &config.reflection,
        ));

        let router = Arc::new(
            SemanticRouter::new(embedding.clone(), config.router.min_confidence, recorder.thresholds())
                .await
                .map_err(cortex_core::CortexError::from)?,
        );
        let primer = Arc::new(ContextPrimer::new(
            memory.clone(),
            embedding.clone(),
            &config.primer,
            config.embedding.dim,
        ));

        let conductor = Arc::new(CognitiveConductor::new(
            gateway.clone(),
            memory.clone(),
            recorder.clone(),
            config.conductor.clone(),
        ));
        let slots = Arc::new(SlotManager::new(config.conductor.slot_pool_size, config.conductor.slot_queue_capacity));

        info!(
            small_model = %config.models.small_model,
            large_model = %config.models.large_model,
            vision = config.models.vision_model.is_some(),
            "cognitive core bootstrapped"
        );

        Ok(CognitiveCore::new(
            memory,
            gateway,
            embedding,
            router,
            primer,
            error_memory,
            reflection,
            recorder,
            conductor,
            slots,
            privacy,
            Arc::new(config),
        ))
    }
}

fn open_connection(path: &Path) -> CortexResult<Connection> {
    Connection::open(path).map_err(|e| CortexError::Database(e.to_string()))
}

/// Derives a per-component SQLite file path from the single configured
/// database path, e.g. `~/.cortex/cortex.db` -> `~/.cortex/cortex.memory.db`.
/// Each of Memory Store, Error Memory, and the Reflection Recorder owns its
/// connection independently, so they cannot share one open file.
fn component_db_path(base: &str, component: &str) -> PathBuf {
    let base = Path::new(base);
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("cortex");
    let extension = base.extension().and_then(|s| s.to_str()).unwrap_or("db");
    let file_name = format!("{stem}.{component}.{extension}");
    match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name),
        _ => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_db_path_appends_component_suffix() {
        let path = component_db_path("/home/user/.cortex/cortex.db", "memory");
        assert_eq!(path, PathBuf::from("/home/user/.cortex/cortex.memory.db"));
    }

    #[test]
    fn component_db_path_handles_bare_filename() {
        let path = component_db_path("cortex.db", "reflection");
        assert_eq!(path, PathBuf::from("cortex.reflection.db"));
    }
}
