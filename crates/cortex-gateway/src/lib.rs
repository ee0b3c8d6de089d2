pub mod backend;
pub mod gateway;
pub mod ollama;
pub mod resolver;
pub mod stream;
pub mod think_tags;

pub use backend::{BackendError, ChatRequest, ChatResponse, LlmBackend, Message, Role};
pub use gateway::ModelGateway;
pub use stream::GatewayEvent;
