use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrimerError {
    #[error("embedding unavailable while priming: {0}")]
    EmbeddingUnavailable(String),
    #[error("memory store error while priming: {0}")]
    Memory(String),
}

impl PrimerError {
    pub fn code(&self) -> &'static str {
        match self {
            PrimerError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            PrimerError::Memory(_) => "MEMORY_ERROR",
        }
    }
}

impl From<cortex_embedding::EmbeddingError> for PrimerError {
    fn from(e: cortex_embedding::EmbeddingError) -> Self {
        PrimerError::EmbeddingUnavailable(e.to_string())
    }
}

impl From<cortex_memory::MemoryError> for PrimerError {
    fn from(e: cortex_memory::MemoryError) -> Self {
        PrimerError::Memory(e.to_string())
    }
}

impl From<PrimerError> for cortex_core::CortexError {
    fn from(e: PrimerError) -> Self {
        match e {
            PrimerError::EmbeddingUnavailable(msg) => cortex_core::CortexError::EmbeddingUnavailable(msg),
            PrimerError::Memory(msg) => cortex_core::CortexError::Database(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrimerError>;
