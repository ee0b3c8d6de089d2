use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("embedding unavailable while routing: {0}")]
    EmbeddingUnavailable(String),
}

impl RouterError {
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
        }
    }
}

impl From<cortex_embedding::EmbeddingError> for RouterError {
    fn from(e: cortex_embedding::EmbeddingError) -> Self {
        RouterError::EmbeddingUnavailable(e.to_string())
    }
}

impl From<RouterError> for cortex_core::CortexError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::EmbeddingUnavailable(msg) => cortex_core::CortexError::EmbeddingUnavailable(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
