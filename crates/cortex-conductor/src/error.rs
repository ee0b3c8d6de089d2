use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("busy: queue depth exceeds capacity")]
    Busy,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("no model available for role: {role}")]
    NoModelAvailable { role: String },

    #[error("memory store error: {0}")]
    Memory(#[from] cortex_memory::MemoryError),

    #[error("reflection recorder error: {0}")]
    Reflection(#[from] cortex_reflection::ReflectionError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    pub fn code(&self) -> &'static str {
        match self {
            ConductorError::Busy => "BUSY",
            ConductorError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            ConductorError::Timeout { .. } => "TIMEOUT",
            ConductorError::NoModelAvailable { .. } => "NO_MODEL_AVAILABLE",
            ConductorError::Memory(_) => "DATABASE_ERROR",
            ConductorError::Reflection(_) => "DATABASE_ERROR",
            ConductorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ConductorError> for cortex_core::CortexError {
    fn from(e: ConductorError) -> Self {
        match e {
            ConductorError::Busy => cortex_core::CortexError::Busy,
            ConductorError::BackendUnavailable(msg) => cortex_core::CortexError::BackendUnavailable(msg),
            ConductorError::Timeout { ms } => cortex_core::CortexError::Timeout { ms },
            ConductorError::NoModelAvailable { role } => cortex_core::CortexError::NoModelAvailable { role },
            ConductorError::Memory(err) => cortex_core::CortexError::Database(err.to_string()),
            ConductorError::Reflection(err) => cortex_core::CortexError::Database(err.to_string()),
            ConductorError::Internal(msg) => cortex_core::CortexError::Internal(msg),
        }
    }
}

impl From<cortex_core::CortexError> for ConductorError {
    fn from(e: cortex_core::CortexError) -> Self {
        match e {
            cortex_core::CortexError::Busy => ConductorError::Busy,
            cortex_core::CortexError::BackendUnavailable(msg) => ConductorError::BackendUnavailable(msg),
            cortex_core::CortexError::Timeout { ms } => ConductorError::Timeout { ms },
            cortex_core::CortexError::NoModelAvailable { role } => ConductorError::NoModelAvailable { role },
            other => ConductorError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
