use thiserror::Error;

#[derive(Debug, Error)]
pub enum ErrorMemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding error: {0}")]
    Embedding(String),
}

impl ErrorMemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorMemoryError::Database(_) => "DATABASE",
            ErrorMemoryError::Embedding(_) => "EMBEDDING_UNAVAILABLE",
        }
    }
}

impl From<cortex_embedding::EmbeddingError> for ErrorMemoryError {
    fn from(e: cortex_embedding::EmbeddingError) -> Self {
        ErrorMemoryError::Embedding(e.to_string())
    }
}

impl From<ErrorMemoryError> for cortex_core::CortexError {
    fn from(e: ErrorMemoryError) -> Self {
        match e {
            ErrorMemoryError::Database(err) => cortex_core::CortexError::Database(err.to_string()),
            ErrorMemoryError::Embedding(msg) => cortex_core::CortexError::EmbeddingUnavailable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ErrorMemoryError>;
