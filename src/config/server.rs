// src/config/server.rs
// Host/logging envelope. No HTTP listener lives in this crate (out of scope);
// retained because the process supervisor (C8) binds its proxies to 127.0.0.1
// and the ambient logging level is read from here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: super::helpers::env_or("HOST", "127.0.0.1"),
            port: super::helpers::env_usize("PORT", 8080) as u16,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: super::helpers::env_or("LOG_LEVEL", "info"),
        }
    }
}
