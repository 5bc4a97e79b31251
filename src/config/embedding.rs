// src/config/embedding.rs
// Embedding service configuration (C2)

use serde::{Deserialize, Serialize};

/// Embedding provider configuration: dimension, model id, retry/timeout envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
    pub max_attempts: usize,
    /// Cooldown applied to a key on a daily-quota signal.
    pub daily_cooldown_secs: i64,
    /// Cooldown applied to a key on a temporary rate-limit signal.
    pub temporary_cooldown_secs: i64,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            model: super::helpers::env_or("EMBED_MODEL", "text-embedding-3-large"),
            dimensions: super::helpers::env_usize("EMBED_DIMENSIONS", 3072),
            timeout_secs: super::helpers::env_usize("EMBED_TIMEOUT_SECS", 30) as u64,
            max_attempts: super::helpers::env_usize("EMBED_MAX_ATTEMPTS", 3),
            daily_cooldown_secs: super::helpers::env_usize("EMBED_DAILY_COOLDOWN_SECS", 86_400)
                as i64,
            temporary_cooldown_secs: super::helpers::env_usize(
                "EMBED_TEMPORARY_COOLDOWN_SECS",
                60,
            ) as i64,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-large".to_string(),
            dimensions: 3072,
            timeout_secs: 30,
            max_attempts: 3,
            daily_cooldown_secs: 86_400,
            temporary_cooldown_secs: 60,
        }
    }
}
