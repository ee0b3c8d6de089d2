use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_core::config::ModelsConfig;
use cortex_core::types::ModelRole;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ChatRequest, ChatResponse, LlmBackend};
use crate::resolver::{resolve, Resolved, ResolverPatterns};
use crate::stream::GatewayEvent;

/// Uniform chat/embedding/streaming interface over one or more local model
/// backends (spec C1 Model Gateway, folding in C3 Model Resolver as a pure
/// function used internally to turn a role into a concrete model id).
///
/// Per-model-identifier calls are serialized through a `tokio::sync::Mutex`
/// keyed in a `DashMap`; a single global `Mutex<Instant>` enforces a soft
/// minimum interval between dispatches to any backend.
pub struct ModelGateway {
    backends: HashMap<ModelRole, Arc<dyn LlmBackend>>,
    model_names: HashMap<ModelRole, String>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    last_dispatch: Mutex<Instant>,
    config: ModelsConfig,
    patterns: ResolverPatterns,
}

impl ModelGateway {
    pub fn new(
        backends: HashMap<ModelRole, Arc<dyn LlmBackend>>,
        model_names: HashMap<ModelRole, String>,
        config: ModelsConfig,
    ) -> Self {
        Self {
            backends,
            model_names,
            locks: DashMap::new(),
            last_dispatch: Mutex::new(Instant::now() - Duration::from_secs(3600)),
            config,
            patterns: ResolverPatterns::default(),
        }
    }

    fn backend_for(&self, role: ModelRole) -> cortex_core::Result<Arc<dyn LlmBackend>> {
        self.backends
            .get(&role)
            .cloned()
            .ok_or_else(|| cortex_core::CortexError::NoModelAvailable {
                role: role.to_string(),
            })
    }

    fn model_lock(&self, model: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn gate_rate_limit(&self) {
        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);
        if min_interval.is_zero() {
            return;
        }
        let mut last = self.last_dispatch.lock().await;
        let elapsed = last.elapsed();
        if elapsed < min_interval {
            tokio::time::sleep(min_interval - elapsed).await;
        }
        *last = Instant::now();
    }

    /// Non-streaming chat, dispatched to the backend resolved for `role`.
    /// On `BackendUnavailable` (spec §4.1 `ModelNotLoaded`: "attempt load,
    /// else fall back to Model Resolver's next candidate"): retries once
    /// against the configured model (the backend's own on-demand load), then
    /// consults [`Self::ensure_loaded`] for a live fallback candidate before
    /// giving up with `ModelNotLoaded`.
    pub async fn chat(
        &self,
        role: ModelRole,
        messages: Vec<crate::backend::Message>,
        system: String,
        max_tokens: u32,
    ) -> cortex_core::Result<ChatResponse> {
        let backend = self.backend_for(role)?;
        let model = self.model_names.get(&role).cloned().ok_or_else(|| {
            cortex_core::CortexError::NoModelAvailable {
                role: role.to_string(),
            }
        })?;

        let req = ChatRequest {
            model: model.clone(),
            system,
            messages,
            max_tokens,
            num_ctx: self.config.num_ctx.min(cortex_core::config::MAX_NUM_CTX),
            stream: false,
        };

        let lock = self.model_lock(&model);
        let _guard = lock.lock().await;
        self.gate_rate_limit().await;

        match backend.chat(&req).await {
            Ok(resp) => Ok(resp),
            Err(BackendError::Unavailable(msg)) => {
                warn!(model = %model, err = %msg, "backend unavailable, attempting load then retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.gate_rate_limit().await;

                match backend.chat(&req).await {
                    Ok(resp) => Ok(resp),
                    Err(BackendError::Unavailable(_)) => {
                        let resolved = self.ensure_loaded(role).await?;
                        if resolved.available && resolved.model != model {
                            warn!(model = %model, fallback = %resolved.model, "falling back to resolver candidate");
                            let mut fallback_req = req.clone();
                            fallback_req.model = resolved.model;
                            self.gate_rate_limit().await;
                            backend.chat(&fallback_req).await.map_err(Into::into)
                        } else {
                            Err(cortex_core::CortexError::ModelNotLoaded { model })
                        }
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Streaming chat; see [`Self::chat`] for retry/lock semantics. Streams
    /// cannot be transparently retried mid-flight, so a `BackendUnavailable`
    /// is surfaced to the caller immediately once any bytes have been sent.
    /// Unlike [`Self::chat`], this does not pre-check [`Self::ensure_loaded`]
    /// — a backend's `list_loaded_models` snapshot can lag behind an
    /// in-flight on-demand load, and failing a stream before it even starts
    /// on a stale snapshot would reject requests the backend could have
    /// served.
    pub async fn chat_stream(
        &self,
        role: ModelRole,
        messages: Vec<crate::backend::Message>,
        system: String,
        max_tokens: u32,
        tx: mpsc::Sender<GatewayEvent>,
    ) -> cortex_core::Result<()> {
        let backend = self.backend_for(role)?;
        let model = self.model_names.get(&role).cloned().ok_or_else(|| {
            cortex_core::CortexError::NoModelAvailable {
                role: role.to_string(),
            }
        })?;

        let req = ChatRequest {
            model: model.clone(),
            system,
            messages,
            max_tokens,
            num_ctx: self.config.num_ctx.min(cortex_core::config::MAX_NUM_CTX),
            stream: true,
        };

        let lock = self.model_lock(&model);
        let _guard = lock.lock().await;
        self.gate_rate_limit().await;

        info!(model = %model, role = %role, "dispatching streaming generation");
        backend.chat_stream(&req, tx).await.map_err(Into::into)
    }

    /// Embed a single piece of text via the embedding role's backend.
    pub async fn embed(&self, text: &str) -> cortex_core::Result<Vec<f32>> {
        let backend = self.backend_for(ModelRole::Embedding)?;
        let model = self
            .model_names
            .get(&ModelRole::Embedding)
            .cloned()
            .ok_or_else(|| cortex_core::CortexError::NoModelAvailable {
                role: "embedding".to_string(),
            })?;

        let lock = self.model_lock(&model);
        let _guard = lock.lock().await;
        self.gate_rate_limit().await;

        backend.embed(text, &model).await.map_err(Into::into)
    }

    /// Current loaded-model set, per role, for diagnostics / `get_models()`.
    pub async fn list_loaded_models(&self) -> cortex_core::Result<HashMap<ModelRole, Vec<String>>> {
        let mut out = HashMap::new();
        for (role, backend) in &self.backends {
            let models = backend
                .list_loaded_models()
                .await
                .map_err(cortex_core::CortexError::from)?;
            out.insert(*role, models);
        }
        Ok(out)
    }

    /// Confirms a role has a concrete, loaded model before use, re-resolving
    /// against the live set if the configured name is not actually present.
    pub async fn ensure_loaded(&self, role: ModelRole) -> cortex_core::Result<Resolved> {
        let backend = self.backend_for(role)?;
        let loaded = backend
            .list_loaded_models()
            .await
            .map_err(cortex_core::CortexError::from)?;
        let resolved = resolve(role, &loaded, &self.patterns);
        if !resolved.available {
            warn!(role = %role, "no live model matched role, falling back to default");
        } else {
            debug!(role = %role, model = %resolved.model, "role resolved");
        }
        Ok(resolved)
    }
}
