// src/chat.rs
// Chat lifecycle glue: the message-level operations the spec names (add,
// edit, delete, import, export, search-global) but assigns to no single
// component, ties C1 (VectorStore), C2 (EmbeddingService) and C7
// (ChatMetadataStore) together the way memory::features::recall_engine's
// top-level facade composes its sub-engines into one call surface.

use std::sync::Arc;
use uuid::Uuid;

use crate::chat_store::ChatMetadataStore;
use crate::embedding::EmbeddingService;
use crate::error::{EngineError, Result};
use crate::model::{Attachment, ChatMetadata, Collection, Message, Role};
use crate::store::VectorStore;

pub struct ChatService {
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingService>,
    chats: Arc<ChatMetadataStore>,
    embedding_dimensions: usize,
}

impl ChatService {
    pub fn new(store: Arc<VectorStore>, embeddings: Arc<EmbeddingService>, chats: Arc<ChatMetadataStore>, embedding_dimensions: usize) -> Self {
        Self { store, embeddings, chats, embedding_dimensions }
    }

    /// Creates a new chat: metadata sidecar plus its three empty collections.
    pub async fn create_chat(&self, chat_id: &str, user_id: &str, title: &str) -> Result<ChatMetadata> {
        self.store.initialize_collections(chat_id).await.map_err(EngineError::from)?;
        let metadata = ChatMetadata::new(chat_id, user_id, title);
        self.chats.save(&metadata).await?;
        Ok(metadata)
    }

    /// `addMessage`: embeds (describing media first where indexable) and
    /// persists. Embedding failures never block insertion (spec §7) - the
    /// message is stored with no vector, picked up later by repair.
    pub async fn add_message(
        &self,
        chat_id: &str,
        collection: Collection,
        role: Role,
        content: &str,
        attachments: Vec<Attachment>,
        embedding_keys: &[String],
    ) -> Result<Message> {
        let mut message = Message::new(chat_id, collection, role, content);
        message.attachments = attachments;

        let embed_text = self.text_with_attachment_descriptions(&message);
        match self.embeddings.generate_embedding(&embed_text, embedding_keys).await {
            Ok(vector) => message.embedding = Some(vector),
            Err(_) => message.embedding = None,
        }

        self.store.insert_record(&message).await.map_err(EngineError::from)?;
        Ok(message)
    }

    fn text_with_attachment_descriptions(&self, message: &Message) -> String {
        let descriptions: Vec<&str> = message.attachments.iter().filter_map(|a| a.rag_description.as_deref()).collect();
        if descriptions.is_empty() {
            message.content.clone()
        } else {
            format!("{}\n{}", message.content, descriptions.join("\n"))
        }
    }

    /// `editMessage` (testable scenario 2): `createdAt` is preserved; the
    /// vector is regenerated iff the embedding service was callable.
    pub async fn edit_message(&self, chat_id: &str, message_id: Uuid, new_text: &str, embedding_keys: &[String]) -> Result<Message> {
        let (_, mut message) = self
            .store
            .find_message(chat_id, message_id)
            .await
            .map_err(EngineError::from)?
            .ok_or_else(|| EngineError::not_found(format!("message {message_id} not found")))?;

        message.content = new_text.to_string();
        if let Ok(vector) = self.embeddings.generate_embedding(new_text, embedding_keys).await {
            message.embedding = Some(vector);
        }

        self.store.update_record(&message).await.map_err(EngineError::from)?;
        Ok(message)
    }

    /// `deleteMessage`: removes the matching row from every collection.
    pub async fn delete_message(&self, chat_id: &str, message_id: Uuid) -> Result<()> {
        self.store.delete_message_everywhere(chat_id, message_id).await.map_err(EngineError::from)
    }

    /// `export` (spec §6): v1.1 document, one array per requested collection.
    pub async fn export_memories(&self, chat_id: &str, collections: &[Collection]) -> Result<ExportDocument> {
        let metadata = self.chats.get(chat_id).await?;
        let mut exported = std::collections::HashMap::new();
        let mut statistics = std::collections::HashMap::new();

        for &collection in collections {
            let mut records = self.store.get_all_records(chat_id, collection).await.map_err(EngineError::from)?;
            records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

            statistics.insert(collection.as_str().to_string(), records.len());
            exported.insert(
                collection.as_str().to_string(),
                records
                    .into_iter()
                    .map(|m| ExportRecord { text: m.content, role: m.role.as_str().to_string(), created_at: m.timestamp, vector: m.embedding })
                    .collect(),
            );
        }

        Ok(ExportDocument {
            version: "1.1".to_string(),
            exported_at: chrono::Utc::now(),
            source: ExportSource { chat_id: chat_id.to_string(), chat_title: metadata.title },
            embedding_dimension: self.embedding_dimensions,
            statistics,
            collections: exported,
        })
    }

    /// `import` (spec §8 invariant): a 1.1 export whose `embeddingDimension`
    /// matches config reuses stored vectors bit-for-bit and makes no
    /// embedding call; otherwise (or for 1.0 documents, which carry no
    /// vectors) every record is re-embedded.
    pub async fn import_memories(&self, chat_id: &str, document: &ExportDocument, embedding_keys: &[String]) -> Result<usize> {
        self.store.initialize_collections(chat_id).await.map_err(EngineError::from)?;
        let reuse_vectors = document.version == "1.1" && document.embedding_dimension == self.embedding_dimensions;

        let mut imported = 0usize;
        for (collection_name, records) in &document.collections {
            let collection: Collection = collection_name.parse().map_err(|_| EngineError::invalid_input(format!("unknown collection in export: {collection_name}")))?;
            let role: fn(&str) -> Role = |s| s.parse().unwrap_or(Role::Document);

            for record in records {
                let mut message = Message::new(chat_id, collection, role(&record.role), &record.text);
                message.timestamp = record.created_at;

                message.embedding = if reuse_vectors && record.vector.is_some() {
                    record.vector.clone()
                } else {
                    self.embeddings.generate_embedding(&record.text, embedding_keys).await.ok()
                };

                self.store.insert_record(&message).await.map_err(EngineError::from)?;
                imported += 1;
            }
        }

        Ok(imported)
    }

    /// `searchGlobal`: a cross-chat lore lookup (spec §4.1 `searchAcrossChats`),
    /// annotated with the derived `relevanceScore = 1/(1+_distance)`.
    pub async fn search_global(&self, chat_ids: &[String], collection: Collection, query: &str, embedding_keys: &[String], limit_per_chat: usize) -> Result<Vec<GlobalSearchHit>> {
        let vector = self.embeddings.generate_embedding(query, embedding_keys).await?;
        let hits = self.store.search_across_chats(chat_ids, collection, &vector, limit_per_chat).await;

        Ok(hits
            .into_iter()
            .map(|h| GlobalSearchHit {
                chat_id: h.message.chat_id.clone(),
                message: h.message,
                relevance_score: 1.0 / (1.0 + h.distance),
            })
            .collect())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportSource {
    pub chat_id: String,
    pub chat_title: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportRecord {
    pub text: String,
    pub role: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportDocument {
    pub version: String,
    pub exported_at: chrono::DateTime<chrono::Utc>,
    pub source: ExportSource,
    pub embedding_dimension: usize,
    pub statistics: std::collections::HashMap<String, usize>,
    pub collections: std::collections::HashMap<String, Vec<ExportRecord>>,
}

#[derive(Debug, Clone)]
pub struct GlobalSearchHit {
    pub chat_id: String,
    pub message: Message,
    pub relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_document_round_trips_through_json() {
        let mut collections = std::collections::HashMap::new();
        collections.insert(
            "fatos".to_string(),
            vec![ExportRecord { text: "Marte é vermelho".to_string(), role: "document".to_string(), created_at: chrono::Utc::now(), vector: Some(vec![0.1, 0.2]) }],
        );
        let doc = ExportDocument {
            version: "1.1".to_string(),
            exported_at: chrono::Utc::now(),
            source: ExportSource { chat_id: "c1".to_string(), chat_title: "Test".to_string() },
            embedding_dimension: 2,
            statistics: std::collections::HashMap::new(),
            collections,
        };

        let json = serde_json::to_string(&doc).unwrap();
        let parsed: ExportDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.version, "1.1");
        assert_eq!(parsed.collections["fatos"][0].text, "Marte é vermelho");
    }
}
