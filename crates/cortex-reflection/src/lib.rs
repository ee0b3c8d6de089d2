pub mod builder;
pub mod db;
pub mod error;
pub mod recorder;
pub mod thresholds;

pub use builder::SelfReflectionBuilder;
pub use error::{ReflectionError, Result};
pub use recorder::{complexity_threshold_key, MetricsRecorder};
pub use thresholds::AdaptiveThresholds;
