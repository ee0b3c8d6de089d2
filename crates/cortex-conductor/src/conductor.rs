use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cortex_core::config::ConductorConfig;
use cortex_core::types::{
    ConfidenceLevel, InteractionOutcome, MessageRole, ModelRole, PrimedContext, RouteDecision,
    Verdict, VerdictAction,
};
use cortex_gateway::{GatewayEvent, Message as GwMessage, ModelGateway, Role as GwRole};
use cortex_memory::MemoryStore;
use cortex_reflection::MetricsRecorder;

use crate::confidence::confidence_score;
use crate::error::{ConductorError, Result};
use crate::events::ConductorEvent;
use crate::verdict::parse_verdict;

/// None of the backends behind `LlmBackend` in this workspace surface
/// per-token logprobs (spec §4.10: "computes or receives... when
/// available"). Absent real telemetry, CHECK and the post-DONE confidence
/// score fall back to this neutral prior so hedging/sentiment still drive
/// the score instead of an invented number masquerading as data.
const NEUTRAL_MEAN_LOGPROB: f32 = -1.5;

/// Same tokens-per-char ratio `cortex-memory::manager` uses for its context
/// budget, reused here to turn a visible-text chunk into a CHECK-window
/// token count without a real tokenizer.
const CHARS_PER_TOKEN: usize = 4;

/// Bound on the small model's CHECK response (spec §4.10 "bounded (≤N tokens)").
const CHECK_MAX_TOKENS: u32 = 120;

/// Upper bound on tokens requested per large-model generation call.
const GENERATION_MAX_TOKENS: u32 = 1024;

/// Consecutive CHECK failures after which CHECK is disabled for the rest
/// of the request (spec §4.10 "Failure semantics").
const MAX_CONSECUTIVE_CHECK_FAILURES: u32 = 3;

/// Cap on how far `check_window` may widen under the confidence-based skip
/// (spec §4.10 "Confidence-based skip"), expressed as a multiple of the
/// configured window.
const MAX_WINDOW_MULTIPLIER: usize = 4;

const CHECK_SYSTEM_PROMPT: &str = "You are a terse verification critic watching another model answer a user. \
Reply with exactly one JSON object and nothing else: \
{\"action\": \"continue|steer|stop|regenerate\", \"reason\": \"<short phrase>\", \"steering_note\": \"<optional>\"}.";

/// Everything the Conductor needs to drive one `generate` call. Built by
/// the facade from Slot Manager admission, Semantic Router, Context
/// Primer, Error Memory, and Self-Reflection Builder output — the
/// Conductor itself never calls into those components (spec §4.10
/// PREPARE is a pure assembly step here).
pub struct GenerateRequest {
    pub conversation_id: i64,
    pub query: String,
    pub route: RouteDecision,
    pub primed: PrimedContext,
    pub reflection_prefix: String,
    pub error_warning: Option<String>,
    pub history_context: String,
    pub cancel_token: CancellationToken,
}

/// Drives one request's large-model generation through PREPARE / STREAM /
/// CHECK / STEER / REGEN / DONE / CANCELLED (spec C10 Cognitive Conductor).
pub struct CognitiveConductor {
    gateway: Arc<ModelGateway>,
    memory: Arc<MemoryStore>,
    recorder: Arc<MetricsRecorder>,
    config: ConductorConfig,
}

impl CognitiveConductor {
    pub fn new(
        gateway: Arc<ModelGateway>,
        memory: Arc<MemoryStore>,
        recorder: Arc<MetricsRecorder>,
        config: ConductorConfig,
    ) -> Self {
        Self {
            gateway,
            memory,
            recorder,
            config,
        }
    }

    /// Runs the generation state machine to completion, pushing every
    /// sideband and token event onto `tx`. Always ends with exactly one of
    /// `ConductorEvent::Done`, `Error`, or `Cancelled` sent, matching the
    /// facade's "every request ends with exactly one terminal event"
    /// contract (spec §6, §7).
    pub async fn generate(&self, req: GenerateRequest, tx: mpsc::Sender<ConductorEvent>) -> Result<()> {
        let start = Instant::now();
        let system = build_system(&req);
        let mut messages = build_messages(&req);

        let mut visible = String::new();
        let mut window_tokens = 0usize;
        let base_window = self.config.check_window.max(1);
        let mut window_size = base_window;
        let mut regen_attempts = 0u32;
        let mut consecutive_check_failures = 0u32;
        let mut check_disabled = false;
        let mut last_verdict_reason = String::new();
        let mut tokens_generated: u32 = 0;
        let mut model_used: Option<String> = None;
        let mut verdict_log: Vec<(u32, VerdictAction, String)> = Vec::new();
        let mut window_index: u32 = 0;

        loop {
            if req.cancel_token.is_cancelled() {
                return self.finish_cancelled(tx).await;
            }

            let (gw_tx, mut gw_rx) = mpsc::channel(64);
            let gateway = self.gateway.clone();
            let role = req.route.model_role;
            let gen_messages = messages.clone();
            let gen_system = system.clone();
            let stream_task = tokio::spawn(async move {
                gateway
                    .chat_stream(role, gen_messages, gen_system, GENERATION_MAX_TOKENS, gw_tx)
                    .await
            });

            let mut in_thinking = false;
            let mut hit_eos = false;
            let mut hit_window = false;
            let mut backend_failed: Option<String> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = req.cancel_token.cancelled() => {
                        stream_task.abort();
                        return self.finish_cancelled(tx).await;
                    }
                    event = gw_rx.recv() => {
                        match event {
                            None => break,
                            Some(GatewayEvent::Loading { model }) => {
                                let _ = tx.send(ConductorEvent::Loading { model }).await;
                            }
                            Some(GatewayEvent::Thinking { text }) => {
                                if !in_thinking {
                                    in_thinking = true;
                                    let _ = tx.send(ConductorEvent::ThinkingStart).await;
                                }
                                let _ = tx.send(ConductorEvent::ThinkingStep { content: text }).await;
                            }
                            Some(GatewayEvent::TextDelta { text }) => {
                                // CHECK fires on the thinking-end transition
                                // independently of the window-token count
                                // (spec §4.10 "CHECK ... on </think> end"), not
                                // just when the W-token window fills.
                                let thinking_just_ended = in_thinking;
                                if in_thinking {
                                    in_thinking = false;
                                    let _ = tx.send(ConductorEvent::ThinkingEnd).await;
                                }
                                let approx_tokens = (text.len() / CHARS_PER_TOKEN).max(1);
                                tokens_generated += approx_tokens as u32;
                                window_tokens += approx_tokens;
                                visible.push_str(&text);
                                if tx.send(ConductorEvent::Token { text }).await.is_err() {
                                    stream_task.abort();
                                    return Ok(());
                                }
                                if thinking_just_ended || window_tokens >= window_size {
                                    window_tokens = 0;
                                    hit_window = true;
                                    break;
                                }
                            }
                            Some(GatewayEvent::Done { model, tokens_out, .. }) => {
                                model_used = Some(model);
                                tokens_generated = tokens_generated.max(tokens_out);
                                hit_eos = true;
                                break;
                            }
                            Some(GatewayEvent::Error { message }) => {
                                backend_failed = Some(message);
                                break;
                            }
                            Some(GatewayEvent::Cancelled) => {
                                stream_task.abort();
                                return self.finish_cancelled(tx).await;
                            }
                        }
                    }
                }
            }

            if in_thinking {
                let _ = tx.send(ConductorEvent::ThinkingEnd).await;
            }
            let stream_result = stream_task.await;

            if let Some(message) = backend_failed {
                return self
                    .finish_backend_failure(&req, &visible, model_used, tokens_generated, message, tx)
                    .await;
            }

            // The gateway channel closed with no tokens, no EOS, and no
            // `GatewayEvent::Error` — the dispatch itself never got off the
            // ground (e.g. no backend registered for the resolved role).
            // Surface the spawned task's own result instead of falling
            // through to the window-drift path below.
            if !hit_eos && !hit_window {
                let (reason, kind) = match stream_result {
                    Ok(Err(e)) => (e.to_string(), e.code().to_string()),
                    Err(join_err) => (join_err.to_string(), "INTERNAL_ERROR".to_string()),
                    Ok(Ok(())) => (
                        "model stream ended without producing output".to_string(),
                        "BACKEND_UNAVAILABLE".to_string(),
                    ),
                };
                warn!(%reason, %kind, "generation stream ended before any output");
                let _ = tx.send(ConductorEvent::Error { reason, kind }).await;
                return Ok(());
            }

            if hit_eos {
                return self
                    .finish_done(
                        &req,
                        &visible,
                        &last_verdict_reason,
                        model_used,
                        tokens_generated,
                        verdict_log,
                        start,
                        tx,
                    )
                    .await;
            }

            debug_assert!(hit_window);
            if check_disabled {
                continue;
            }

            let verdict = match self.check(&req, &visible).await {
                Ok(v) => {
                    consecutive_check_failures = 0;
                    v
                }
                Err(e) => {
                    consecutive_check_failures += 1;
                    warn!(err = %e, consecutive_check_failures, "CHECK call failed, defaulting to continue");
                    if consecutive_check_failures >= MAX_CONSECUTIVE_CHECK_FAILURES {
                        warn!("disabling CHECK for the remainder of this request");
                        check_disabled = true;
                    }
                    Verdict::default()
                }
            };

            last_verdict_reason = verdict.reason.clone();
            verdict_log.push((window_index, verdict.action, verdict.reason.clone()));
            window_index += 1;

            match verdict.action {
                VerdictAction::Continue => {
                    if crate::confidence::verdict_sentiment(&verdict.reason) >= 0.0 {
                        window_size = (window_size * 2).min(base_window * MAX_WINDOW_MULTIPLIER);
                    } else {
                        window_size = base_window;
                    }
                }
                VerdictAction::Steer => {
                    window_size = base_window;
                    let note = verdict
                        .steering_note
                        .clone()
                        .unwrap_or_else(|| "Stay closely on topic.".to_string());
                    messages.push(system_msg(&format!("Steering note: {note}")));
                    let _ = tx.send(ConductorEvent::Steering { note }).await;
                }
                VerdictAction::Stop => {
                    return self
                        .finish_done(
                            &req,
                            &visible,
                            &last_verdict_reason,
                            model_used,
                            tokens_generated,
                            verdict_log,
                            start,
                            tx,
                        )
                        .await;
                }
                VerdictAction::Regenerate => {
                    window_size = base_window;
                    regen_attempts += 1;
                    if regen_attempts > self.config.max_regenerate_retries {
                        warn!(regen_attempts, "regenerate retry budget exhausted, forcing DONE");
                        return self
                            .finish_done(
                                &req,
                                &visible,
                                &last_verdict_reason,
                                model_used,
                                tokens_generated,
                                verdict_log,
                                start,
                                tx,
                            )
                            .await;
                    }
                    // Already-emitted caller-visible tokens cannot be
                    // unsent on a live stream, so a `Retraction` tells the
                    // caller how many trailing bytes to drop from its own
                    // buffer — keeping it equal to the truncated transcript
                    // that actually gets persisted (spec §8 property 1).
                    let len_before = visible.len();
                    truncate_tail(&mut visible, base_window * CHARS_PER_TOKEN);
                    let removed = len_before - visible.len();
                    if removed > 0 {
                        let _ = tx.send(ConductorEvent::Retraction { char_count: removed }).await;
                    }
                    messages.push(system_msg(&format!(
                        "The previous response chunk drifted ({}); disregard it and continue more carefully.",
                        verdict.reason
                    )));
                }
            }
        }
    }

    async fn check(&self, req: &GenerateRequest, visible: &str) -> Result<Verdict> {
        let prompt = build_check_prompt(req, visible);
        let messages = vec![GwMessage {
            role: GwRole::User,
            content: prompt,
        }];
        let resp = self
            .gateway
            .chat(ModelRole::Small, messages, CHECK_SYSTEM_PROMPT.to_string(), CHECK_MAX_TOKENS)
            .await
            .map_err(ConductorError::from)?;
        Ok(parse_verdict(&resp.content))
    }

    async fn finish_done(
        &self,
        req: &GenerateRequest,
        visible: &str,
        last_verdict_reason: &str,
        model_used: Option<String>,
        tokens_generated: u32,
        verdict_log: Vec<(u32, VerdictAction, String)>,
        start: Instant,
        tx: mpsc::Sender<ConductorEvent>,
    ) -> Result<()> {
        let message = self
            .memory
            .add_message(
                req.conversation_id,
                MessageRole::Assistant,
                visible,
                model_used.as_deref(),
                Some(tokens_generated),
            )
            .await?;

        for (window_index, action, reason) in &verdict_log {
            if let Err(e) = self
                .recorder
                .record_verification(message.id, *window_index, action.to_string().as_str(), reason)
            {
                warn!(err = %e, "failed to record verification log entry");
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        let confidence = confidence_score(NEUTRAL_MEAN_LOGPROB, visible, last_verdict_reason);
        let level = ConfidenceLevel::from_score(confidence);

        let outcome = InteractionOutcome {
            message_id: message.id,
            category: req.route.category,
            was_correction: false,
            implicit_positive: matches!(level, ConfidenceLevel::High | ConfidenceLevel::Medium),
            implicit_negative: matches!(level, ConfidenceLevel::Low),
            facts_in_context: req.primed.memories.len() as u32,
            style_prompt_length: req.reflection_prefix.len() as u32,
            confidence_score: confidence,
            latency_ms,
            tokens_generated,
        };
        if let Err(e) = self.recorder.record(outcome) {
            warn!(err = %e, "failed to record interaction outcome");
        }

        info!(conversation_id = req.conversation_id, %level, latency_ms, "generation done");
        let _ = tx.send(ConductorEvent::Confidence { score: confidence, level }).await;
        let _ = tx
            .send(ConductorEvent::Done {
                conversation_id: req.conversation_id,
                confidence_score: confidence,
                confidence_level: level,
                latency_ms,
                tokens_generated,
            })
            .await;
        Ok(())
    }

    async fn finish_backend_failure(
        &self,
        req: &GenerateRequest,
        visible: &str,
        model_used: Option<String>,
        tokens_generated: u32,
        reason: String,
        tx: mpsc::Sender<ConductorEvent>,
    ) -> Result<()> {
        warn!(err = %reason, "large model backend failed mid-stream");
        let mut content = visible.to_string();
        content.push_str(" [connection lost]");

        let message = self
            .memory
            .add_message(
                req.conversation_id,
                MessageRole::Assistant,
                &content,
                model_used.as_deref(),
                Some(tokens_generated),
            )
            .await?;

        let outcome = InteractionOutcome {
            message_id: message.id,
            category: req.route.category,
            was_correction: false,
            implicit_positive: false,
            implicit_negative: true,
            facts_in_context: req.primed.memories.len() as u32,
            style_prompt_length: req.reflection_prefix.len() as u32,
            confidence_score: 0.0,
            latency_ms: 0,
            tokens_generated,
        };
        if let Err(e) = self.recorder.record(outcome) {
            warn!(err = %e, "failed to record interaction outcome for a failed generation");
        }

        let _ = tx
            .send(ConductorEvent::Error {
                reason,
                kind: "BACKEND_UNAVAILABLE".to_string(),
            })
            .await;
        Ok(())
    }

    async fn finish_cancelled(&self, tx: mpsc::Sender<ConductorEvent>) -> Result<()> {
        debug!("generation cancelled");
        let _ = tx.send(ConductorEvent::Cancelled).await;
        Ok(())
    }
}

fn system_msg(content: &str) -> GwMessage {
    GwMessage {
        role: GwRole::System,
        content: content.to_string(),
    }
}

/// Assembles PREPARE's message list: self-reflection prefix, error
/// warning, primed instructions, primed memories as system notes, history
/// slice, then the user query (spec §4.10 PREPARE).
fn build_messages(req: &GenerateRequest) -> Vec<GwMessage> {
    let mut messages = Vec::new();

    if !req.reflection_prefix.trim().is_empty() {
        messages.push(system_msg(&req.reflection_prefix));
    }
    if let Some(warning) = req.error_warning.as_deref() {
        if !warning.trim().is_empty() {
            messages.push(system_msg(warning));
        }
    }
    if !req.primed.instructions_fragment.trim().is_empty() {
        messages.push(system_msg(&req.primed.instructions_fragment));
    }
    for memory in &req.primed.memories {
        messages.push(system_msg(&memory.content));
    }
    if !req.history_context.trim().is_empty() {
        messages.push(system_msg(&req.history_context));
    }
    messages.push(GwMessage {
        role: GwRole::User,
        content: req.query.clone(),
    });
    messages
}

fn build_system(req: &GenerateRequest) -> String {
    let mut system = req.route.system_prompt_fragment.clone().unwrap_or_default();
    if !req.primed.tool_hints.is_empty() {
        if !system.is_empty() {
            system.push('\n');
        }
        system.push_str("Relevant approaches: ");
        system.push_str(&req.primed.tool_hints.join(", "));
    }
    system
}

/// Compact CHECK prompt: category, first ~200 chars of the query, last
/// ~400 chars of generated_so_far, and a logprob summary (spec §4.10
/// "Verdict protocol").
fn build_check_prompt(req: &GenerateRequest, visible: &str) -> String {
    let query_excerpt: String = req.query.chars().take(200).collect();
    let generated_excerpt = tail_chars(visible, 400);
    format!(
        "category: {}\nquery: {}\ngenerated_so_far: {}\nlogprob_summary: mean={:.2} min={:.2}\n\
         Should generation continue, steer, stop, or regenerate the last chunk?",
        req.route.category, query_excerpt, generated_excerpt, NEUTRAL_MEAN_LOGPROB, NEUTRAL_MEAN_LOGPROB
    )
}

fn tail_chars(s: &str, n: usize) -> String {
    let total = s.chars().count();
    if total <= n {
        return s.to_string();
    }
    s.chars().skip(total - n).collect()
}

/// Drops the trailing `budget` bytes (rounded to a char boundary) from
/// `s`, used by REGEN to truncate the internally-held transcript.
fn truncate_tail(s: &mut String, budget: usize) {
    let target_len = s.len().saturating_sub(budget);
    let mut cut = target_len;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
