use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Hard cap on context window tokens requested from either local model
/// (spec §6, `num_ctx`).
pub const MAX_NUM_CTX: u32 = 8192;

/// Top-level configuration (`cortex.toml` + `CORTEX_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub primer: PrimerConfig,
    #[serde(default)]
    pub conductor: ConductorConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub reflection: ReflectionConfig,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            models: ModelsConfig::default(),
            embedding: EmbeddingConfig::default(),
            router: RouterConfig::default(),
            primer: PrimerConfig::default(),
            conductor: ConductorConfig::default(),
            privacy: PrivacyConfig::default(),
            reflection: ReflectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Model Gateway (C1) + Model Resolver (C3) configuration.
///
/// The two local roles ("small" and "large") and the optional vision model
/// are each served by a local backend reachable over HTTP — multiple
/// backends may point at the same process or separate ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_small_base_url")]
    pub small_base_url: String,
    #[serde(default = "default_small_model")]
    pub small_model: String,
    #[serde(default = "default_large_base_url")]
    pub large_base_url: String,
    #[serde(default = "default_large_model")]
    pub large_model: String,
    pub vision_base_url: Option<String>,
    pub vision_model: Option<String>,
    /// Context window requested per generation, capped by [`MAX_NUM_CTX`].
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    /// Minimum interval between dispatches to any single backend (soft
    /// global rate limit, spec §4.1).
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    /// How long a request may run before the gateway reports it timed out.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            small_base_url: default_small_base_url(),
            small_model: default_small_model(),
            large_base_url: default_large_base_url(),
            large_model: default_large_model(),
            vision_base_url: None,
            vision_model: None,
            num_ctx: default_num_ctx(),
            min_request_interval_ms: default_min_request_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Embedding Service (C2) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Output vector dimensionality — stored facts/corrections must match.
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
    /// LRU+TTL cache capacity and lifetime (spec §4.2).
    #[serde(default = "default_embedding_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_embedding_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dim: default_embedding_dim(),
            cache_capacity: default_embedding_cache_capacity(),
            cache_ttl_secs: default_embedding_cache_ttl_secs(),
        }
    }
}

/// Semantic Router (C4) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Confidence below which the router falls back to the default category.
    #[serde(default = "default_router_min_confidence")]
    pub min_confidence: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_router_min_confidence(),
        }
    }
}

/// Context Primer (C5) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimerConfig {
    #[serde(default = "default_primer_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_primer_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Cosine similarity above which a cached primed context is reused.
    #[serde(default = "default_primer_cache_similarity_threshold")]
    pub cache_similarity_threshold: f32,
}

impl Default for PrimerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_primer_cache_capacity(),
            cache_ttl_secs: default_primer_cache_ttl_secs(),
            cache_similarity_threshold: default_primer_cache_similarity_threshold(),
        }
    }
}

/// Cognitive Conductor (C10) + Slot Manager (C11) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Concurrent generation slots (spec §4.11).
    #[serde(default = "default_slot_pool_size")]
    pub slot_pool_size: usize,
    /// Max requests allowed to wait once all slots are busy.
    #[serde(default = "default_slot_queue_capacity")]
    pub slot_queue_capacity: usize,
    /// Sliding token window over which the CHECK stage re-evaluates drift.
    #[serde(default = "default_check_window")]
    pub check_window: usize,
    /// Max REGEN attempts before the conductor gives up and emits what it has.
    #[serde(default = "default_max_regenerate_retries")]
    pub max_regenerate_retries: u32,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            slot_pool_size: default_slot_pool_size(),
            slot_queue_capacity: default_slot_queue_capacity(),
            check_window: default_check_window(),
            max_regenerate_retries: default_max_regenerate_retries(),
        }
    }
}

/// Privacy Lock (C7) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Seconds of inactivity after which an unlocked state auto-relocks.
    #[serde(default = "default_privacy_idle_lock_secs")]
    pub idle_lock_secs: u64,
    /// Credential checked by `unlock_privacy`. Unset means any non-empty
    /// credential unlocks the vault — a single-user local install has no
    /// one else to keep out, just an idle-screen-style nuisance barrier.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            idle_lock_secs: default_privacy_idle_lock_secs(),
            passphrase: None,
        }
    }
}

/// Self-Reflection Builder (C8) + Metrics & Reflection Recorder (C12)
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// How many days back the "as of N days ago" trend comparison looks
    /// (spec §4.8).
    #[serde(default = "default_reflection_trend_days")]
    pub trend_days: i64,
    /// Sliding window size for the adaptive-threshold rollback (spec §4.12).
    #[serde(default = "default_feedback_window")]
    pub feedback_window: usize,
    /// Fraction of negative feedback in the window that trips a rollback.
    #[serde(default = "default_rollback_negative_fraction")]
    pub rollback_negative_fraction: f32,
    /// EMA smoothing factor applied to routing complexity thresholds.
    #[serde(default = "default_threshold_ema_alpha")]
    pub threshold_ema_alpha: f32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            trend_days: default_reflection_trend_days(),
            feedback_window: default_feedback_window(),
            rollback_negative_fraction: default_rollback_negative_fraction(),
            threshold_ema_alpha: default_threshold_ema_alpha(),
        }
    }
}

fn default_reflection_trend_days() -> i64 {
    7
}
fn default_feedback_window() -> usize {
    20
}
fn default_rollback_negative_fraction() -> f32 {
    0.5
}
fn default_threshold_ema_alpha() -> f32 {
    0.2
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/cortex.db", home)
}
fn default_small_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_small_model() -> String {
    "qwen2.5:1.5b".to_string()
}
fn default_large_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_large_model() -> String {
    "qwen2.5:14b".to_string()
}
fn default_num_ctx() -> u32 {
    MAX_NUM_CTX
}
fn default_min_request_interval_ms() -> u64 {
    0
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_embedding_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_dim() -> usize {
    768
}
fn default_embedding_cache_capacity() -> usize {
    2000
}
fn default_embedding_cache_ttl_secs() -> u64 {
    3600
}
fn default_router_min_confidence() -> f32 {
    0.5
}
fn default_primer_cache_capacity() -> usize {
    2000
}
fn default_primer_cache_ttl_secs() -> u64 {
    3600
}
fn default_primer_cache_similarity_threshold() -> f32 {
    0.92
}
fn default_slot_pool_size() -> usize {
    4
}
fn default_slot_queue_capacity() -> usize {
    32
}
fn default_check_window() -> usize {
    20
}
fn default_max_regenerate_retries() -> u32 {
    2
}
fn default_privacy_idle_lock_secs() -> u64 {
    1800
}

impl CortexConfig {
    /// Load config from a TOML file with `CORTEX_*` env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `~/.cortex/cortex.toml`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CortexConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CORTEX_").split("_"))
            .extract()
            .map_err(|e| crate::error::CortexError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cortex/cortex.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = CortexConfig::default();
        assert!(cfg.models.num_ctx <= MAX_NUM_CTX);
        assert!(cfg.primer.cache_similarity_threshold > 0.0 && cfg.primer.cache_similarity_threshold <= 1.0);
        assert_eq!(cfg.conductor.check_window, 20);
        assert_eq!(cfg.conductor.max_regenerate_retries, 2);
    }
}
