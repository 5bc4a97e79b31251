// src/config/mod.rs
// Central configuration for the conversational memory engine.

pub mod embedding;
pub mod generation;
pub mod helpers;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod supervisor;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: EngineConfig = EngineConfig::from_env();
}

/// Main configuration structure - composes all domain configs (C1-C9 envelopes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub embedding: embedding::EmbeddingConfig,
    pub generation: generation::GenerationConfig,
    pub retrieval: retrieval::RetrievalConfig,
    pub store: store::StoreConfig,
    pub supervisor: supervisor::SupervisorConfig,
    pub server: server::ServerConfig,
    pub logging: server::LoggingConfig,

    /// JWT_SECRET is read by the (external) auth collaborator, not this crate;
    /// we surface only the optional global embedding-key fallback from spec §6.
    pub global_embedding_key: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            embedding: embedding::EmbeddingConfig::from_env(),
            generation: generation::GenerationConfig::from_env(),
            retrieval: retrieval::RetrievalConfig::from_env(),
            store: store::StoreConfig::from_env(),
            supervisor: supervisor::SupervisorConfig::from_env(),
            server: server::ServerConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            global_embedding_key: std::env::var("GEMINI_API_KEY").ok(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(anyhow::anyhow!("embedding dimension must be non-zero"));
        }
        if self.retrieval.narrative_word_budget > self.retrieval.total_word_budget {
            return Err(anyhow::anyhow!(
                "narrative word budget cannot exceed total word budget"
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding: embedding::EmbeddingConfig::default(),
            generation: generation::GenerationConfig::default(),
            retrieval: retrieval::RetrievalConfig::default(),
            store: store::StoreConfig::default(),
            supervisor: supervisor::SupervisorConfig::default(),
            server: server::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            logging: server::LoggingConfig {
                level: "info".to_string(),
            },
            global_embedding_key: None,
        }
    }
}
