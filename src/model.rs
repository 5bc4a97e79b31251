// src/model.rs
// Core data types shared across the engine: chat messages, the three vector
// collections, and chat-level metadata/config. Grounded on the shape of
// memory::core::types::MemoryEntry, trimmed to what the retrieval and
// tool-calling pipelines (C1-C7) actually read and write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three semantic collections kept per chat (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Raw dialogue turns.
    Historico,
    /// Discrete extracted facts.
    Fatos,
    /// Abstract lore/world concepts.
    Conceitos,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Historico => "historico",
            Collection::Fatos => "fatos",
            Collection::Conceitos => "conceitos",
        }
    }

    pub fn all() -> [Collection; 3] {
        [Collection::Historico, Collection::Fatos, Collection::Conceitos]
    }

    /// Narrative retrieval never touches raw dialogue, only distilled memory.
    pub fn narrative_targets() -> [Collection; 2] {
        [Collection::Fatos, Collection::Conceitos]
    }
}

impl std::str::FromStr for Collection {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "historico" => Ok(Collection::Historico),
            "fatos" => Ok(Collection::Fatos),
            "conceitos" => Ok(Collection::Conceitos),
            other => Err(crate::error::EngineError::invalid_input(format!(
                "unknown collection: {other}"
            ))),
        }
    }
}

/// Message role (spec §3): the three roles a stored record can carry.
/// Distinct from `llm::TurnRole`, which shapes the wire conversation sent to
/// a provider rather than what is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    Document,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::Document => "document",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "model" => Ok(Role::Model),
            "document" => Ok(Role::Document),
            other => Err(crate::error::EngineError::invalid_input(format!("unknown role: {other}"))),
        }
    }
}

/// An attachment descriptor carried by a message (spec §3): name, mime type,
/// the base64 payload itself, and an optional description generated by the
/// embedding service for RAG enrichment (`describeMediaForRAG`, spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub base64: String,
    pub rag_description: Option<String>,
}

impl Attachment {
    /// Media that the retrieval pipeline can surface as "RAG media" (spec §4.4):
    /// images and PDFs, the only indexable attachment kinds.
    pub fn is_indexable_media(&self) -> bool {
        self.mime_type.starts_with("image/") || self.mime_type == "application/pdf"
    }
}

/// Unified record stored in every collection. The same shape is reused across
/// historico/fatos/conceitos; `kind` distinguishes how it is weighted for
/// display (spec-supplemented salience tagging, SPEC_FULL §B.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: String,
    pub collection: Collection,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub attachments: Vec<Attachment>,
    /// Free-form tag used for display weighting (e.g. "dialogue", "fact", "lore").
    pub kind: Option<String>,
    /// Opaque reasoning-continuity token some providers emit (spec §3 `thoughtSignature`).
    pub thought_signature: Option<String>,
}

impl Message {
    pub fn new(chat_id: impl Into<String>, collection: Collection, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id: chat_id.into(),
            collection,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            embedding: None,
            attachments: Vec::new(),
            kind: None,
            thought_signature: None,
        }
    }

    /// Zero-vector sentinel check (spec §4.1): sum-of-abs below the configured
    /// epsilon means embedding generation silently failed upstream.
    pub fn is_zero_vector(&self, epsilon: f32) -> bool {
        match &self.embedding {
            Some(v) => v.iter().map(|x| x.abs()).sum::<f32>() < epsilon,
            None => true,
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Per-chat configuration, merge-updatable (spec §4.7 `updateChatConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub system_prompt: Option<String>,
    pub generation_model: Option<String>,
    pub provider_kind: Option<String>,
    pub persona_name: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            generation_model: None,
            provider_kind: None,
            persona_name: None,
        }
    }
}

/// Per-chat metadata sidecar (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub chat_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: ChatConfig,
}

impl ChatMetadata {
    pub fn new(chat_id: impl Into<String>, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            config: ChatConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_vector_detected_below_epsilon() {
        let mut m = Message::new("c1", Collection::Historico, Role::User, "hi");
        m.embedding = Some(vec![0.0001, -0.0002, 0.0001]);
        assert!(m.is_zero_vector(1e-3));
        m.embedding = Some(vec![0.5, 0.5]);
        assert!(!m.is_zero_vector(1e-3));
    }

    #[test]
    fn missing_embedding_counts_as_zero_vector() {
        let m = Message::new("c1", Collection::Fatos, Role::Model, "hi");
        assert!(m.is_zero_vector(1e-3));
    }

    #[test]
    fn indexable_media_detects_images_and_pdfs() {
        let img = Attachment { name: "a.png".into(), mime_type: "image/png".into(), base64: String::new(), rag_description: None };
        let pdf = Attachment { name: "a.pdf".into(), mime_type: "application/pdf".into(), base64: String::new(), rag_description: None };
        let txt = Attachment { name: "a.txt".into(), mime_type: "text/plain".into(), base64: String::new(), rag_description: None };
        assert!(img.is_indexable_media());
        assert!(pdf.is_indexable_media());
        assert!(!txt.is_indexable_media());
    }
}
