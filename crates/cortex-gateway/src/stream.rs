/// Events emitted while a backend streams a chat response (spec §4.1: the
/// gateway "never silently drops tokens" and "emits boundary events").
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Incremental visible text content from the model.
    TextDelta { text: String },

    /// Incremental content that arrived between `<think>`/`</think>`
    /// markers — routed to a separate reasoning stream, never to the
    /// visible content stream, but retained verbatim for collection.
    Thinking { text: String },

    /// Stream completed successfully.
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
        stop_reason: String,
    },

    /// Backend signalled it is loading the requested model.
    Loading { model: String },

    /// Error during streaming.
    Error { message: String },

    /// Stream was closed because of cancellation; callers must not also
    /// expect a `Done` event for the same request.
    Cancelled,
}
