// src/config/store.rs
// Vector store configuration (C1)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub qdrant_url: String,
    /// Sum-of-absolute-values threshold below which a vector is treated as the zero sentinel.
    pub zero_vector_epsilon: f32,
    /// Delay between re-embed calls while repairing zero-vector messages.
    pub repair_throttle_ms: u64,
    /// Minimum gap before the per-chat auto-repair cooldown fires again.
    pub auto_repair_cooldown_secs: i64,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            qdrant_url: super::helpers::env_or("QDRANT_URL", "http://localhost:6334"),
            zero_vector_epsilon: super::helpers::env_parsed_or("STORE_ZERO_VECTOR_EPSILON", 1e-3),
            repair_throttle_ms: super::helpers::env_usize("STORE_REPAIR_THROTTLE_MS", 250) as u64,
            auto_repair_cooldown_secs: super::helpers::env_usize(
                "STORE_AUTO_REPAIR_COOLDOWN_SECS",
                300,
            ) as i64,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: "http://localhost:6334".to_string(),
            zero_vector_epsilon: 1e-3,
            repair_throttle_ms: 250,
            auto_repair_cooldown_secs: 300,
        }
    }
}
