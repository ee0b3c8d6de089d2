use std::collections::HashMap;

use cortex_core::types::ModelRole;

/// Snapshot returned by [`crate::CognitiveCore::get_models`]: the model
/// identifier configured per role, alongside whatever each backend reports
/// as actually resident (spec §6 `get_models`).
#[derive(Debug, Clone)]
pub struct ModelsInfo {
    pub configured: HashMap<ModelRole, String>,
    pub loaded: HashMap<ModelRole, Vec<String>>,
}
