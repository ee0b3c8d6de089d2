pub mod confidence;
pub mod conductor;
pub mod error;
pub mod events;
pub mod slots;
pub mod verdict;

pub use conductor::{CognitiveConductor, GenerateRequest};
pub use error::{ConductorError, Result};
pub use events::ConductorEvent;
pub use slots::{SlotGuard, SlotManager};
