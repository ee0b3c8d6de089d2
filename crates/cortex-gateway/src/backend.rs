use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::GatewayEvent;

/// A single message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Request to a local model backend (spec §4.1, `chat`).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    /// Context window requested from the backend; callers must have already
    /// clamped this to [`cortex_core::config::MAX_NUM_CTX`].
    pub num_ctx: u32,
    pub stream: bool,
}

/// Non-streaming chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Common interface for a locally-hosted model backend serving chat,
/// streaming chat, and embeddings (spec §4.1/§4.2, §6 "no wire protocol is
/// mandated for model backends beyond streaming chat and embed text").
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name, used in logs and `BackendUnavailable` messages.
    fn name(&self) -> &str;

    /// Non-streaming chat completion.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, BackendError>;

    /// Streaming chat completion. Default falls back to non-streaming
    /// `chat` and emits a single `TextDelta` + `Done`.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<GatewayEvent>,
    ) -> Result<(), BackendError> {
        let resp = self.chat(req).await?;
        let _ = tx
            .send(GatewayEvent::TextDelta {
                text: resp.content,
            })
            .await;
        let _ = tx
            .send(GatewayEvent::Done {
                model: resp.model,
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }

    /// Embed a single piece of text (spec §4.2).
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, BackendError>;

    /// Names of models currently loaded/resident on this backend (spec §4.3,
    /// fed to the Model Resolver).
    async fn list_loaded_models(&self) -> Result<Vec<String>, BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<BackendError> for cortex_core::CortexError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Http(err) => cortex_core::CortexError::BackendUnavailable(err.to_string()),
            BackendError::Api { status, message } => {
                cortex_core::CortexError::BackendUnavailable(format!("{status}: {message}"))
            }
            BackendError::Parse(msg) => cortex_core::CortexError::Internal(msg),
            BackendError::Unavailable(msg) => cortex_core::CortexError::BackendUnavailable(msg),
            BackendError::Cancelled => cortex_core::CortexError::Internal("cancelled".to_string()),
        }
    }
}
