pub mod bootstrap;
pub mod core;
pub mod events;
pub mod models;

pub use core::CognitiveCore;
pub use events::FacadeEvent;
pub use models::ModelsInfo;
