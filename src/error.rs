// src/error.rs
// Crate-wide error taxonomy (spec §7). Lower-level modules (store, embedding,
// provider adapters) return anyhow::Result for internal plumbing and convert
// to EngineError at the component boundary, the way git::error converts
// git2::Error/io::Error into GitError.

use thiserror::Error;

/// The stable machine code surfaced at a (hypothetical) HTTP layer as `errorType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    InvalidInput,
    NotFound,
    Auth,
    RateLimit,
    AllKeysExhausted,
    Moderation,
    ProxyError,
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidInput => "invalid_input",
            ErrorType::NotFound => "not_found",
            ErrorType::Auth => "auth",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::AllKeysExhausted => "all_keys_exhausted",
            ErrorType::Moderation => "moderation",
            ErrorType::ProxyError => "proxy_error",
            ErrorType::Internal => "server_error",
        }
    }
}

/// Status of one key in a cooldown registry, surfaced on exhaustion.
#[derive(Debug, Clone)]
pub struct KeyStatus {
    pub key_label: String,
    pub cooldown_remaining_secs: i64,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("all keys exhausted for {model}")]
    AllKeysExhausted {
        model: String,
        keys_status: Vec<KeyStatus>,
    },

    #[error("content moderation: {reasons:?}")]
    Moderation { reasons: Vec<String> },

    #[error("proxy error: {0}")]
    ProxyError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            EngineError::InvalidInput(_) => ErrorType::InvalidInput,
            EngineError::NotFound(_) => ErrorType::NotFound,
            EngineError::Auth(_) => ErrorType::Auth,
            EngineError::RateLimit(_) => ErrorType::RateLimit,
            EngineError::AllKeysExhausted { .. } => ErrorType::AllKeysExhausted,
            EngineError::Moderation { .. } => ErrorType::Moderation,
            EngineError::ProxyError(_) => ErrorType::ProxyError,
            EngineError::Internal(_) => ErrorType::Internal,
        }
    }

    /// Localized-ish display string (spec's `userMessage`). Kept in plain English
    /// here; a caller-side i18n layer is out of scope.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::InvalidInput(msg) => format!("Invalid request: {msg}"),
            EngineError::NotFound(msg) => format!("Not found: {msg}"),
            EngineError::Auth(_) => "You need to sign in again.".to_string(),
            EngineError::RateLimit(_) => "The model is busy right now, try again shortly.".to_string(),
            EngineError::AllKeysExhausted { model, .. } => {
                format!("All configured keys for {model} are in cooldown.")
            }
            EngineError::Moderation { .. } => "That request was flagged by content moderation.".to_string(),
            EngineError::ProxyError(_) => "The auxiliary process is unavailable.".to_string(),
            EngineError::Internal(_) => "Something went wrong.".to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_maps_to_stable_tag() {
        assert_eq!(
            EngineError::invalid_input("x").error_type().as_str(),
            "invalid_input"
        );
        assert_eq!(
            EngineError::AllKeysExhausted {
                model: "m".into(),
                keys_status: vec![]
            }
            .error_type()
            .as_str(),
            "all_keys_exhausted"
        );
    }
}
