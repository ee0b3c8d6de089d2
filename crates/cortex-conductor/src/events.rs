use cortex_core::types::ConfidenceLevel;

/// Sideband and visible-token events emitted by [`crate::conductor::CognitiveConductor::generate`]
/// (spec §4.10 contract, §6 event ordering). The facade adapts these 1:1
/// into whatever wire format the transport collaborator wants.
#[derive(Debug, Clone)]
pub enum ConductorEvent {
    /// Emitted while waiting on [`crate::slots::SlotManager::acquire`].
    QueueUpdate { position: usize },

    /// The resolved backend is loading the requested model (spec §4.1).
    Loading { model: String },

    /// A `<think>` block started in the large model's raw output.
    ThinkingStart,

    /// Incremental reasoning content inside the current thinking block.
    ThinkingStep { content: String },

    /// The current `<think>` block closed.
    ThinkingEnd,

    /// One unit of visible generated text, strictly ordered (spec §5,
    /// testable property 1).
    Token { text: String },

    /// A steering note was injected into the large model's context between
    /// CHECK windows (spec §4.10 STEER state).
    Steering { note: String },

    /// CHECK called for REGEN: the trailing `char_count` bytes of
    /// already-emitted `Token` text must be discarded by the caller before
    /// appending anything further, since the persisted message drops them
    /// too (spec §8 testable property 1 — tokens cannot be unsent on a live
    /// stream, so this is how the caller's reconstructed buffer is kept
    /// equal to what `Done` ultimately persists).
    Retraction { char_count: usize },

    /// Emitted once, after `Done`/`Error`/`Cancelled` have otherwise been
    /// decided — carries the post-generation confidence score (spec §4.10
    /// "Confidence score").
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

    /// Terminal: cancelled via the request's cancellation token.
    Cancelled,
}
