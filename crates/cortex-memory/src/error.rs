use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("conversation not found: {0}")]
    ConversationNotFound(i64),

    #[error("fact not found: {0}")]
    FactNotFound(i64),

    #[error("access to category {category} is denied while the privacy lock is held")]
    PrivacyDenied { category: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("embedding error: {0}")]
    Embedding(String),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Database(_) => "DATABASE",
            MemoryError::ConversationNotFound(_) => "NOT_FOUND",
            MemoryError::FactNotFound(_) => "NOT_FOUND",
            MemoryError::PrivacyDenied { .. } => "PRIVACY_DENIED",
            MemoryError::Serialization(_) => "SERIALIZATION",
            MemoryError::Embedding(_) => "EMBEDDING_UNAVAILABLE",
        }
    }
}

impl From<cortex_embedding::EmbeddingError> for MemoryError {
    fn from(e: cortex_embedding::EmbeddingError) -> Self {
        MemoryError::Embedding(e.to_string())
    }
}

impl From<MemoryError> for cortex_core::CortexError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Database(err) => cortex_core::CortexError::Database(err.to_string()),
            MemoryError::ConversationNotFound(id) => {
                cortex_core::CortexError::InvalidRequest(format!("conversation {id} not found"))
            }
            MemoryError::FactNotFound(id) => {
                cortex_core::CortexError::InvalidRequest(format!("fact {id} not found"))
            }
            MemoryError::PrivacyDenied { category } => cortex_core::CortexError::PrivacyDenied { category },
            MemoryError::Serialization(msg) => cortex_core::CortexError::Internal(msg),
            MemoryError::Embedding(msg) => cortex_core::CortexError::EmbeddingUnavailable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
