use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("embedding dimensionality mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    pub fn code(&self) -> &'static str {
        match self {
            EmbeddingError::Unavailable(_) => "EMBEDDING_UNAVAILABLE",
            EmbeddingError::DimensionMismatch { .. } => "EMBEDDING_DIMENSION_MISMATCH",
        }
    }
}

impl From<EmbeddingError> for cortex_core::CortexError {
    fn from(e: EmbeddingError) -> Self {
        cortex_core::CortexError::EmbeddingUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
