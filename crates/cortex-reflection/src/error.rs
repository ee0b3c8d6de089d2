use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReflectionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ReflectionError {
    pub fn code(&self) -> &'static str {
        match self {
            ReflectionError::Database(_) => "DATABASE",
            ReflectionError::Serialization(_) => "SERIALIZATION",
        }
    }
}

impl From<ReflectionError> for cortex_core::CortexError {
    fn from(e: ReflectionError) -> Self {
        match e {
            ReflectionError::Database(err) => cortex_core::CortexError::Database(err.to_string()),
            ReflectionError::Serialization(msg) => cortex_core::CortexError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReflectionError>;
