use cortex_core::types::ConfidenceLevel;
use cortex_conductor::ConductorEvent;

/// The facade's own event contract for a `chat` stream — field-for-field
/// the same shape as [`cortex_conductor::ConductorEvent`], but owned by
/// this crate so transport code (HTTP/SSE, WebSocket, a CLI's own stdout
/// writer) depends on a boundary type instead of reaching into the
/// Conductor's internals (spec §6: "the facade adapts these 1:1 into
/// whatever wire format the transport collaborator wants").
#[derive(Debug, Clone)]
pub enum FacadeEvent {
    /// Emitted while the request waits for a free generation slot.
    QueueUpdate { position: usize },

    /// The resolved backend is loading the requested model.
    Loading { model: String },

    /// A `<think>` block started in the model's raw output.
    ThinkingStart,

    /// Incremental reasoning content inside the current thinking block.
    ThinkingStep { content: String },

    /// The current `<think>` block closed.
    ThinkingEnd,

    /// One unit of visible generated text, strictly ordered.
    Token { text: String },

    /// A steering note was injected between CHECK windows.
    Steering { note: String },

    /// CHECK called for REGEN: drop the trailing `char_count` bytes already
    /// appended from prior `Token` events before appending anything further.
    Retraction { char_count: usize },

    /// Emitted once, just before the terminal event, carrying the
    /// post-generation confidence score.
    Confidence { score: f32, level: ConfidenceLevel },

    /// Terminal: generation completed successfully.
    Done {
        conversation_id: i64,
        confidence_score: f32,
        confidence_level: ConfidenceLevel,
        latency_ms: u64,
        tokens_generated: u32,
    },

    /// Terminal: generation failed. `kind` mirrors `cortex_core::CortexError::code()`.
    Error { reason: String, kind: String },

    /// Terminal: cancelled via the request's cancellation token or `stop()`.
    Cancelled,
}

impl From<ConductorEvent> for FacadeEvent {
    fn from(event: ConductorEvent) -> Self {
        match event {
            ConductorEvent::QueueUpdate { position } => FacadeEvent::QueueUpdate { position },
            ConductorEvent::Loading { model } => FacadeEvent::Loading { model },
            ConductorEvent::ThinkingStart => FacadeEvent::ThinkingStart,
            ConductorEvent::ThinkingStep { content } => FacadeEvent::ThinkingStep { content },
            ConductorEvent::ThinkingEnd => FacadeEvent::ThinkingEnd,
            ConductorEvent::Token { text } => FacadeEvent::Token { text },
            ConductorEvent::Steering { note } => FacadeEvent::Steering { note },
            ConductorEvent::Retraction { char_count } => FacadeEvent::Retraction { char_count },
            ConductorEvent::Confidence { score, level } => FacadeEvent::Confidence { score, level },
            ConductorEvent::Done {
                conversation_id,
                confidence_score,
                confidence_level,
                latency_ms,
                tokens_generated,
            } => FacadeEvent::Done {
                conversation_id,
                confidence_score,
                confidence_level,
                latency_ms,
                tokens_generated,
            },
            ConductorEvent::Error { reason, kind } => FacadeEvent::Error { reason, kind },
            ConductorEvent::Cancelled => FacadeEvent::Cancelled,
        }
    }
}
