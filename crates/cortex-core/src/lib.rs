pub mod config;
pub mod error;
pub mod types;

pub use config::CortexConfig;
pub use error::{CortexError, Result};
