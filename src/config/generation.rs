// src/config/generation.rs
// LLM generation dispatch configuration (C3)

use serde::{Deserialize, Serialize};

/// Which wire adapter a provider tag maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Direct native vector+chat API (Gemini-style `parts`/`functionCall`/`thoughtSignature`).
    Native,
    /// OpenAI-compatible chat-completions HTTP (generic router, local proxy, Cerebras).
    OpenAiCompatible,
    /// OpenAI-compatible endpoint fronted by a long-lived local proxy process (thinking models).
    LocalProxy,
    /// Native tool-calling vendor (`tool_use`/`tool_result` blocks with stable ids).
    NativeToolCalling,
}

impl ProviderKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "local_proxy" | "cli2api" => ProviderKind::LocalProxy,
            "openai_compatible" | "router" | "cerebras" => ProviderKind::OpenAiCompatible,
            "native_tool_calling" | "anthropic" => ProviderKind::NativeToolCalling,
            _ => ProviderKind::Native,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base backoff applied before a retry, doubled each attempt (429 gets an extra factor).
    pub backoff_base_secs: u64,
    pub backoff_factor: u64,
    pub max_attempts_chat: usize,
    pub chat_timeout_secs: u64,
    pub local_proxy_timeout_secs: u64,
    pub daily_cooldown_secs: i64,
    pub temporary_retry_delay_secs: u64,
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        Self {
            backoff_base_secs: super::helpers::env_usize("GEN_BACKOFF_BASE_SECS", 2) as u64,
            backoff_factor: super::helpers::env_usize("GEN_BACKOFF_FACTOR", 2) as u64,
            max_attempts_chat: super::helpers::env_usize("GEN_MAX_ATTEMPTS_CHAT", 5),
            chat_timeout_secs: super::helpers::env_usize("GEN_CHAT_TIMEOUT_SECS", 120) as u64,
            local_proxy_timeout_secs: super::helpers::env_usize(
                "GEN_LOCAL_PROXY_TIMEOUT_SECS",
                300,
            ) as u64,
            daily_cooldown_secs: super::helpers::env_usize("GEN_DAILY_COOLDOWN_SECS", 86_400)
                as i64,
            temporary_retry_delay_secs: super::helpers::env_usize(
                "GEN_TEMPORARY_RETRY_DELAY_SECS",
                2,
            ) as u64,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 2,
            backoff_factor: 2,
            max_attempts_chat: 5,
            chat_timeout_secs: 120,
            local_proxy_timeout_secs: 300,
            daily_cooldown_secs: 86_400,
            temporary_retry_delay_secs: 2,
        }
    }
}
