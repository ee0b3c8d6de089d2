use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use cortex_conductor::{CognitiveConductor, ConductorEvent, GenerateRequest, SlotManager};
use cortex_core::config::CortexConfig;
use cortex_core::types::{
    Conversation, Fact, Message, MessageRole, MetricsSnapshot, ModelRole, SlotPriority,
    ThinkingMode,
};
use cortex_core::{CortexError, Result as CortexResult};
use cortex_embedding::EmbeddingService;
use cortex_errormemory::{format_warning, ErrorMemory};
use cortex_gateway::ModelGateway;
use cortex_memory::{MemoryStore, PrivacyLock};
use cortex_primer::ContextPrimer;
use cortex_reflection::{MetricsRecorder, SelfReflectionBuilder};
use cortex_router::SemanticRouter;

use crate::events::FacadeEvent;
use crate::models::ModelsInfo;

/// Capacity of every per-request event channel. Generous enough that a slow
/// transport consumer never backpressures token streaming mid-sentence.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Characters of a fresh query used to title an auto-created conversation.
const CONVERSATION_TITLE_CHARS: usize = 60;

/// Character budget handed to [`cortex_memory::MemoryStore::get_smart_context`]
/// for the running conversation's recent/summarized/fact history.
const HISTORY_CONTEXT_TOKEN_BUDGET: usize = 1200;

/// Confidence assigned to facts added directly through `add_document` —
/// these are user-supplied ground truth, not something the system inferred.
const DOCUMENT_FACT_CONFIDENCE: f32 = 1.0;

/// The single external-interface type for the cognitive core. Every
/// operation a caller (CLI, HTTP server, desktop shell) needs is an inherent
/// async method here; nothing in this crate knows about HTTP, WebSockets, or
/// any other wire format. `chat` returns a request id plus a stream of
/// [`FacadeEvent`]s — everything else is a plain request/response call.
#[derive(Clone)]
pub struct CognitiveCore {
    memory: Arc<MemoryStore>,
    gateway: Arc<ModelGateway>,
    embedding: Arc<EmbeddingService>,
    router: Arc<SemanticRouter>,
    primer: Arc<ContextPrimer>,
    error_memory: Arc<ErrorMemory>,
    reflection: Arc<SelfReflectionBuilder>,
    recorder: Arc<MetricsRecorder>,
    conductor: Arc<CognitiveConductor>,
    slots: Arc<SlotManager>,
    privacy: Arc<PrivacyLock>,
    config: Arc<CortexConfig>,
    active_requests: Arc<DashMap<Uuid, CancellationToken>>,
}

impl CognitiveCore {
    /// Assembles a core from already-constructed components. Intended for
    /// tests and for callers that want to substitute a fake backend or an
    /// in-memory database; production callers should prefer
    /// [`CognitiveCore::bootstrap`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        memory: Arc<MemoryStore>,
        gateway: Arc<ModelGateway>,
        embedding: Arc<EmbeddingService>,
        router: Arc<SemanticRouter>,
        primer: Arc<ContextPrimer>,
        error_memory: Arc<ErrorMemory>,
        reflection: Arc<SelfReflectionBuilder>,
        recorder: Arc<MetricsRecorder>,
        conductor: Arc<CognitiveConductor>,
        slots: Arc<SlotManager>,
        privacy: Arc<PrivacyLock>,
        config: Arc<CortexConfig>,
    ) -> Self {
        Self {
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
            config,
            active_requests: Arc::new(DashMap::new()),
        }
    }

    /// Sends a query through PREPARE (routing, priming, error-memory lookup,
    /// reflection prefix, history assembly, slot admission) and STREAM/CHECK/
    /// STEER/REGEN/DONE generation, returning immediately with a request id
    /// and an event stream.
    ///
    /// The returned stream always ends in exactly one of `Done`, `Error`, or
    /// `Cancelled` — including when admission is refused (`Busy` surfaces as
    /// an `Error` event, never a blocking wait past the queue's capacity).
    /// The PREPARE/STREAM work runs in a spawned task so a caller sitting
    /// behind a slow queue still receives `QueueUpdate` heartbeats instead of
    /// the call hanging before it hands back a stream.
    pub fn chat(
        &self,
        query: impl Into<String>,
        conversation_id: Option<i64>,
        model_override: Option<ModelRole>,
        thinking_mode_override: Option<ThinkingMode>,
        has_image: bool,
        cancel_token: CancellationToken,
    ) -> (Uuid, ReceiverStream<FacadeEvent>) {
        let request_id = Uuid::new_v4();
        self.active_requests.insert(request_id, cancel_token.clone());

        let (out_tx, out_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let core = self.clone();
        let query = query.into();

        tokio::spawn(async move {
            let outcome = core
                .prepare_and_generate(
                    conversation_id,
                    model_override,
                    thinking_mode_override,
                    has_image,
                    &query,
                    cancel_token,
                    &out_tx,
                )
                .await;

            if let Err(e) = outcome {
                warn!(err = %e, "chat request failed before or during generation");
                let _ = out_tx
                    .send(FacadeEvent::Error {
                        reason: e.to_string(),
                        kind: e.code().to_string(),
                    })
                    .await;
            }

            core.active_requests.remove(&request_id);
        });

        (request_id, ReceiverStream::new(out_rx))
    }

    async fn prepare_and_generate(
        &self,
        conversation_id: Option<i64>,
        model_override: Option<ModelRole>,
        thinking_mode_override: Option<ThinkingMode>,
        has_image: bool,
        query: &str,
        cancel_token: CancellationToken,
        out_tx: &mpsc::Sender<FacadeEvent>,
    ) -> CortexResult<()> {
        let conversation_id = match conversation_id {
            Some(id) => id,
            None => {
                let title: String = query.chars().take(CONVERSATION_TITLE_CHARS).collect();
                self.memory.create_conversation(&title).await?.id
            }
        };

        // Captured before the new user message lands, so a correction always
        // pairs with the assistant turn it is actually correcting (spec §4.9,
        // §8 scenario 6), not with itself.
        let previous_assistant = self
            .memory
            .get_messages(conversation_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant);

        let user_message = self
            .memory
            .add_message(conversation_id, MessageRole::User, query, None, None)
            .await?;

        self.maybe_record_correction(query, user_message.id, previous_assistant.as_ref())
            .await;

        self.spawn_background_fact_extraction(conversation_id, query.to_string());

        let profile = match self.memory.get_user_profile().await {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, "failed to load user profile, using defaults");
                Default::default()
            }
        };

        let (mut route, query_embedding) = self.router.route(query, Some(&profile), has_image).await;
        if let Some(role) = model_override {
            route.model_role = role;
        }
        if let Some(mode) = thinking_mode_override {
            route.thinking_mode = mode;
        }

        let primed = match self
            .primer
            .prime(query, &route, &profile, query_embedding.clone())
            .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, "context primer failed, continuing without primed context");
                empty_primed_context(route.category)
            }
        };

        let error_warning = self.lookup_error_warning(query, query_embedding.as_deref()).await;

        let reflection_prefix = match self.reflection.build_prompt(true).await {
            Ok(prefix) => prefix,
            Err(e) => {
                warn!(err = %e, "self-reflection builder failed, continuing without a prefix");
                String::new()
            }
        };

        let history_context = self
            .memory
            .get_smart_context(conversation_id, HISTORY_CONTEXT_TOKEN_BUDGET)
            .await
            .unwrap_or_default();

        let (ev_tx, mut ev_rx) = mpsc::channel::<ConductorEvent>(EVENT_CHANNEL_CAPACITY);
        let slot = self.slots.acquire(SlotPriority::User, Some(&ev_tx)).await?;

        let req = GenerateRequest {
            conversation_id,
            query: query.to_string(),
            route,
            primed,
            reflection_prefix,
            error_warning,
            history_context,
            cancel_token,
        };

        let conductor = self.conductor.clone();
        let generate_task = tokio::spawn(async move {
            let result = conductor.generate(req, ev_tx).await;
            drop(slot);
            result
        });

        let mut saw_terminal = false;
        while let Some(event) = ev_rx.recv().await {
            if matches!(
                event,
                ConductorEvent::Done { .. } | ConductorEvent::Error { .. } | ConductorEvent::Cancelled
            ) {
                saw_terminal = true;
            }
            if out_tx.send(event.into()).await.is_err() {
                generate_task.abort();
                return Ok(());
            }
        }

        // The conductor's own code path always sends exactly one terminal
        // event before returning, but a `?`-propagated error on a DB write
        // inside `finish_done`/`finish_backend_failure` can return `Err`
        // without ever reaching that send. Backstop it here rather than let
        // the stream end with no terminal event.
        match generate_task.await {
            Ok(Ok(())) => {
                if !saw_terminal {
                    warn!("generation task ended without a terminal event");
                    let _ = out_tx
                        .send(FacadeEvent::Error {
                            reason: "generation ended without a terminal event".to_string(),
                            kind: "INTERNAL_ERROR".to_string(),
                        })
                        .await;
                }
            }
            Ok(Err(e)) => {
                if !saw_terminal {
                    let _ = out_tx
                        .send(FacadeEvent::Error {
                            reason: e.to_string(),
                            kind: e.code().to_string(),
                        })
                        .await;
                } else {
                    warn!(err = %e, "generation returned an error after a terminal event was already sent");
                }
            }
            Err(join_err) => {
                if !saw_terminal {
                    let _ = out_tx
                        .send(FacadeEvent::Error {
                            reason: join_err.to_string(),
                            kind: "INTERNAL_ERROR".to_string(),
                        })
                        .await;
                } else {
                    warn!(err = %join_err, "generation task panicked after a terminal event was already sent");
                }
            }
        }

        Ok(())
    }

    /// Detects whether `query` corrects `previous_assistant`'s reply and, if
    /// so, logs it to Error Memory (spec §4.9 `record`). A PREPARE-stage
    /// concern like priming or reflection: failures degrade silently, never
    /// fail the request.
    async fn maybe_record_correction(&self, query: &str, correction_message_id: i64, previous_assistant: Option<&Message>) {
        let Some(previous) = previous_assistant else {
            return;
        };
        let Some(category) = self.error_memory.detect_correction(query) else {
            return;
        };
        if let Err(e) = self
            .error_memory
            .record_correction(previous.id, correction_message_id, &previous.content, query, category)
            .await
        {
            warn!(err = %e, "failed to record correction, continuing");
        }
    }

    /// Runs fact extraction on the background slot pool so it never delays
    /// the foreground response (spec §4.6 "fact extraction runs in the
    /// background"). Best-effort: a failed acquire or extraction just logs
    /// and drops, since nothing downstream is waiting on this turn's facts.
    fn spawn_background_fact_extraction(&self, conversation_id: i64, message: String) {
        let memory = self.memory.clone();
        let slots = self.slots.clone();
        tokio::spawn(async move {
            let _slot = match slots.acquire(SlotPriority::Background, None).await {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(err = %e, "failed to acquire background slot for fact extraction");
                    return;
                }
            };
            if let Err(e) = memory.extract_facts(conversation_id, &message).await {
                warn!(err = %e, "background fact extraction failed");
            }
        });
    }

    /// Looks up prior corrections similar to this query, reusing the query's
    /// embedding when the router already computed one (spec §9's "no second
    /// embedding call" rule applies here too).
    async fn lookup_error_warning(&self, query: &str, query_embedding: Option<&[f32]>) -> Option<String> {
        let entries = match query_embedding {
            Some(e) => self.error_memory.get_warning_for_embedding(e),
            None => self.error_memory.get_warning(query).await,
        };
        match entries {
            Ok(entries) => format_warning(&entries),
            Err(e) => {
                warn!(err = %e, "error memory lookup failed, continuing without a warning");
                None
            }
        }
    }

    /// Cancels an in-flight `chat` request. Returns `false` if the request
    /// is unknown or already finished.
    pub fn stop(&self, request_id: Uuid) -> bool {
        match self.active_requests.get(&request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn create_conversation(&self, title: &str) -> CortexResult<Conversation> {
        Ok(self.memory.create_conversation(title).await?)
    }

    pub async fn list_conversations(&self, limit: usize) -> CortexResult<Vec<Conversation>> {
        Ok(self.memory.list_conversations(limit).await?)
    }

    pub async fn get_messages(&self, conversation_id: i64) -> CortexResult<Vec<Message>> {
        Ok(self.memory.get_messages(conversation_id).await?)
    }

    /// Deletes a conversation's messages, summaries, and conversation-scoped
    /// facts, then invalidates the Context Primer cache (spec §4.6): a
    /// primed context cached before the delete may reference facts or
    /// summaries that no longer exist, and a conversation's facts can span
    /// more than one category, so this clears the whole cache rather than
    /// one category's slice.
    pub async fn delete_conversation(&self, conversation_id: i64) -> CortexResult<()> {
        self.memory.delete_conversation(conversation_id).await?;
        self.primer.clear_cache();
        Ok(())
    }

    /// Adds a standing fact directly, bypassing the correction/inference
    /// pipeline. `metadata`, when present, is folded into the stored content
    /// as a trailing annotation since facts carry no separate metadata column.
    pub async fn add_document(&self, text: &str, metadata: Option<&str>) -> CortexResult<Fact> {
        let content = match metadata {
            Some(m) if !m.is_empty() => format!("{text}\n\n[metadata: {m}]"),
            _ => text.to_string(),
        };
        Ok(self
            .memory
            .add_fact(None, &content, cortex_core::types::FactCategory::General, DOCUMENT_FACT_CONFIDENCE)
            .await?)
    }

    pub fn delete_document(&self, id: i64) -> CortexResult<()> {
        Ok(self.memory.delete_fact(id)?)
    }

    pub fn get_metrics(&self) -> CortexResult<MetricsSnapshot> {
        Ok(self.recorder.get_metrics()?)
    }

    /// Records explicit user feedback (`+1`/`-1`) on a past reply, folding it
    /// into the adaptive thresholds' rolling window. `message_id` is logged
    /// for traceability; nothing in this crate persists a message-scoped
    /// rating column today, so it is not round-trippable through a future
    /// `get_messages` call.
    pub fn submit_feedback(&self, message_id: i64, rating: i8) -> CortexResult<()> {
        if rating != 1 && rating != -1 {
            return Err(CortexError::InvalidRequest(format!(
                "feedback rating must be 1 or -1, got {rating}"
            )));
        }
        tracing::debug!(message_id, rating, "recording explicit feedback");
        self.recorder.thresholds().record_feedback(rating);
        Ok(())
    }

    /// Unlocks vault/shadow-category facts for the configured idle window.
    /// With no passphrase configured, any non-empty credential is accepted
    /// (single-user local trust model); with one configured, it must match
    /// exactly.
    pub fn unlock_privacy(&self, credential: &str) -> CortexResult<()> {
        match &self.config.privacy.passphrase {
            Some(expected) if expected != credential => Err(CortexError::PrivacyDenied {
                category: "vault".to_string(),
            }),
            _ => {
                self.privacy.unlock();
                Ok(())
            }
        }
    }

    pub fn lock_privacy(&self) {
        self.privacy.lock();
    }

    pub fn is_privacy_unlocked(&self) -> bool {
        self.privacy.is_unlocked()
    }

    pub async fn get_models(&self) -> CortexResult<ModelsInfo> {
        let loaded = self.gateway.list_loaded_models().await?;
        let configured = configured_model_names(&self.config);
        Ok(ModelsInfo { configured, loaded })
    }
}

fn empty_primed_context(category: cortex_core::types::IntentCategory) -> cortex_core::types::PrimedContext {
    cortex_core::types::PrimedContext {
        category,
        memories: Vec::new(),
        success_patterns: Vec::new(),
        tool_hints: Vec::new(),
        instructions_fragment: String::new(),
        prime_time_ms: 0,
        from_cache: false,
    }
}

fn configured_model_names(config: &CortexConfig) -> std::collections::HashMap<ModelRole, String> {
    let mut names = std::collections::HashMap::new();
    names.insert(ModelRole::Small, config.models.small_model.clone());
    names.insert(ModelRole::Large, config.models.large_model.clone());
    names.insert(ModelRole::Embedding, config.embedding.model.clone());
    if let Some(vision_model) = &config.models.vision_model {
        names.insert(ModelRole::Vision, vision_model.clone());
    }
    names
}
