use thiserror::Error;

/// Error kinds shared across the orchestration core (spec §7).
///
/// Every component-local error type converts into this one at its crate
/// boundary via `#[from]`, so the facade only ever has to match on one enum
/// when building an `error{reason, kind}` event.
#[derive(Debug, Error)]
pub enum CortexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Model not loaded: {model}")]
    ModelNotLoaded { model: String },

    #[error("No model available for role: {role}")]
    NoModelAvailable { role: String },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Busy: queue depth exceeds capacity")]
    Busy,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Privacy denied: category {category} is locked")]
    PrivacyDenied { category: String },

    #[error("Corrupted state: {0}")]
    CorruptedState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CortexError {
    /// Short error code sent to callers in the facade's `error{kind}` event.
    pub fn code(&self) -> &'static str {
        match self {
            CortexError::Config(_) => "CONFIG_ERROR",
            CortexError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            CortexError::ModelNotLoaded { .. } => "MODEL_NOT_LOADED",
            CortexError::NoModelAvailable { .. } => "NO_MODEL_AVAILABLE",
            CortexError::Timeout { .. } => "TIMEOUT",
            CortexError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            CortexError::Busy => "BUSY",
            CortexError::InvalidRequest(_) => "INVALID_REQUEST",
            CortexError::PrivacyDenied { .. } => "PRIVACY_DENIED",
            CortexError::CorruptedState(_) => "CORRUPTED_STATE",
            CortexError::Database(_) => "DATABASE_ERROR",
            CortexError::Serialization(_) => "SERIALIZATION_ERROR",
            CortexError::Io(_) => "IO_ERROR",
            CortexError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CortexError>;
