// src/store/mod.rs
// Per-chat Qdrant vector store (C1): three collections per chat sharing the
// Message schema. Grounded on memory::storage::qdrant::multi_store::QdrantMultiStore
// - same client setup, upsert/search/delete idiom - generalized from "one set
// of global collections per embedding head" to "one set of three collections
// per chat".

use anyhow::{Context, Result};
use qdrant_client::qdrant::{
    vector_output::Vector as VectorOutput, vectors_output::VectorsOptions,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, PointId, PointStruct,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Collection, Message, Role};

pub mod associations;

/// A search hit: the stored message plus Qdrant's reported distance.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: Message,
    pub distance: f32,
}

/// Multi-collection Qdrant store, scoped per chat via a collection name prefix.
pub struct VectorStore {
    client: Qdrant,
    dimensions: u64,
}

impl VectorStore {
    pub async fn connect(url: &str, dimensions: u64) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .context("failed to connect to Qdrant")?;

        Ok(Self { client, dimensions })
    }

    fn collection_name(&self, chat_id: &str, collection: Collection) -> String {
        format!("chat_{}_{}", chat_id, collection.as_str())
    }

    /// `initializeCollections` - ensure all three collections exist for a chat.
    pub async fn initialize_collections(&self, chat_id: &str) -> Result<()> {
        for collection in Collection::all() {
            let name = self.collection_name(chat_id, collection);
            self.ensure_collection(&name).await?;
        }
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<()> {
        if self.client.collection_exists(name).await? {
            return Ok(());
        }

        info!("creating Qdrant collection: {}", name);
        match self
            .client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(self.dimensions, Distance::Cosine)),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("already exists") => {
                debug!("collection {} already exists (race with another process)", name);
                Ok(())
            }
            Err(e) => Err(e).context(format!("failed to create collection: {name}")),
        }
    }

    /// `insertRecord`. A missing embedding (upstream generation failed, spec
    /// §7) is stored as a zero vector rather than rejected, so the message
    /// still lands and `repairZeroEmbeddings` can pick it up later.
    pub async fn insert_record(&self, message: &Message) -> Result<()> {
        let collection = self.collection_name(&message.chat_id, message.collection);
        let embedding = message.embedding.clone().unwrap_or_else(|| vec![0.0; self.dimensions as usize]);

        let point = PointStruct::new(message.id.to_string(), embedding, message_payload(message));

        self.client
            .upsert_points(UpsertPointsBuilder::new(&collection, vec![point]).wait(true))
            .await
            .context("failed to upsert point")?;

        Ok(())
    }

    /// `searchByVector` against one collection of one chat.
    pub async fn search_by_vector(
        &self,
        chat_id: &str,
        collection: Collection,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredMessage>> {
        let name = self.collection_name(chat_id, collection);

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&name, vector.to_vec(), limit as u64).with_payload(true),
            )
            .await
            .context("failed to search Qdrant")?;

        Ok(results
            .result
            .into_iter()
            .filter_map(|p| {
                // Qdrant reports `score` as cosine similarity (higher = more similar,
                // per the teacher's own `search::semantic`/`hybrid_search` descending-
                // by-score sort); the spec's `_distance` contract is "smaller = more
                // similar", so convert to cosine distance here, once, at the store
                // boundary, rather than leaking similarity semantics into rescoring.
                let distance = 1.0 - p.score;
                point_to_message(p, chat_id, collection).map(|m| ScoredMessage { message: m, distance })
            })
            .collect())
    }

    /// Search several chats' collections in one call (used for cross-chat lore
    /// lookups); collects per-(chat, collection) errors without failing the batch.
    pub async fn search_across_chats(
        &self,
        chat_ids: &[String],
        collection: Collection,
        vector: &[f32],
        limit_per_chat: usize,
    ) -> Vec<ScoredMessage> {
        let mut out = Vec::new();
        for chat_id in chat_ids {
            match self.search_by_vector(chat_id, collection, vector, limit_per_chat).await {
                Ok(mut hits) => out.append(&mut hits),
                Err(e) => warn!("search_across_chats failed for {}: {}", chat_id, e),
            }
        }
        out
    }

    /// `getAllRecordsFromCollection` - full scroll of one chat collection.
    pub async fn get_all_records(&self, chat_id: &str, collection: Collection) -> Result<Vec<Message>> {
        let name = self.collection_name(chat_id, collection);
        let mut out = Vec::new();
        let mut offset: Option<qdrant_client::qdrant::PointId> = None;
        let limit = 200u32;

        loop {
            let mut builder = ScrollPointsBuilder::new(&name).limit(limit).with_payload(true).with_vectors(true);
            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let response = self.client.scroll(builder).await?;
            if response.result.is_empty() {
                break;
            }

            let page_len = response.result.len() as u32;
            for point in response.result {
                if let Some(m) = retrieved_point_to_message(point, chat_id, collection) {
                    out.push(m);
                }
            }

            offset = response.next_page_offset;
            if offset.is_none() || page_len < limit {
                break;
            }
        }

        Ok(out)
    }

    /// `updateRecordByMessageId` - re-upsert with the same point id.
    pub async fn update_record(&self, message: &Message) -> Result<()> {
        self.insert_record(message).await
    }

    /// `deleteRecordByMessageId`. Qdrant compacts on delete by construction
    /// (point ids are removed from the index immediately), satisfying the
    /// invariant that deleted ids never resurface in search.
    pub async fn delete_record(&self, chat_id: &str, collection: Collection, message_id: Uuid) -> Result<()> {
        let name = self.collection_name(chat_id, collection);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&name).points(vec![PointId::from(message_id.to_string())]),
            )
            .await
            .context("failed to delete point")?;
        Ok(())
    }

    pub async fn delete_by_ids(&self, chat_id: &str, collection: Collection, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let name = self.collection_name(chat_id, collection);
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.to_string())).collect();
        self.client
            .delete_points(DeletePointsBuilder::new(&name).points(point_ids).wait(true))
            .await
            .context("failed to delete points")?;
        Ok(())
    }

    /// `countZeroEmbeddings` - scan a collection for the zero-vector sentinel.
    pub async fn count_zero_embeddings(&self, chat_id: &str, collection: Collection, epsilon: f32) -> Result<usize> {
        let records = self.get_all_records(chat_id, collection).await?;
        Ok(records.iter().filter(|m| m.is_zero_vector(epsilon)).count())
    }

    /// `repairZeroEmbeddings` - re-embed every zero-vector message in a collection
    /// via the caller-supplied embedding callback, throttling between calls
    /// (spec §4.1). Messages with empty text are skipped (nothing to embed).
    /// Returns the count of messages successfully repaired.
    pub async fn repair_zero_embeddings<F, Fut>(
        &self,
        chat_id: &str,
        collection: Collection,
        epsilon: f32,
        throttle: std::time::Duration,
        mut embed: F,
    ) -> Result<usize>
    where
        F: FnMut(String) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Vec<f32>>>,
    {
        let records = self.get_all_records(chat_id, collection).await?;
        let mut repaired = 0usize;

        for mut message in records {
            if !message.is_zero_vector(epsilon) || message.content.trim().is_empty() {
                continue;
            }

            match embed(message.content.clone()).await {
                Ok(vector) => {
                    message.embedding = Some(vector);
                    if let Err(e) = self.update_record(&message).await {
                        warn!("repair_zero_embeddings: failed to update {}: {}", message.id, e);
                        continue;
                    }
                    repaired += 1;
                }
                Err(e) => warn!("repair_zero_embeddings: embedding failed for {}: {}", message.id, e),
            }

            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
        }

        Ok(repaired)
    }

    /// `deleteRecordByMessageId` at chat scope (spec §4.1): delete matching rows
    /// across all three collections. Best-effort per collection; a missing row
    /// in a given collection is not an error.
    pub async fn delete_message_everywhere(&self, chat_id: &str, message_id: Uuid) -> Result<()> {
        for collection in Collection::all() {
            if let Err(e) = self.delete_record(chat_id, collection, message_id).await {
                warn!(
                    "delete_message_everywhere: {} in {:?} for chat {}: {}",
                    message_id, collection, chat_id, e
                );
            }
        }
        Ok(())
    }

    /// Locates a message by id without knowing its collection up front (used
    /// by the tool-calling orchestrator's `edit_memory`/`delete_memories`,
    /// spec §4.6). Checks `fatos`/`conceitos` before `historico` since tool
    /// calls only ever target distilled memory, not raw dialogue.
    pub async fn find_message(&self, chat_id: &str, message_id: Uuid) -> Result<Option<(Collection, Message)>> {
        for collection in [Collection::Fatos, Collection::Conceitos, Collection::Historico] {
            let records = self.get_all_records(chat_id, collection).await?;
            if let Some(message) = records.into_iter().find(|m| m.id == message_id) {
                return Ok(Some((collection, message)));
            }
        }
        Ok(None)
    }

    pub async fn health_check(&self) -> bool {
        // A cheap probe: list collections succeeds iff the client can reach Qdrant.
        self.client.list_collections().await.is_ok()
    }
}

fn message_payload(message: &Message) -> HashMap<String, QdrantValue> {
    let mut payload = HashMap::new();
    payload.insert("chat_id".to_string(), message.chat_id.clone().into());
    payload.insert("collection".to_string(), message.collection.as_str().to_string().into());
    payload.insert("role".to_string(), message.role.as_str().to_string().into());
    payload.insert("content".to_string(), message.content.clone().into());
    payload.insert("timestamp".to_string(), message.timestamp.timestamp_millis().into());
    payload.insert("message_id".to_string(), message.id.to_string().into());
    if let Some(ref kind) = message.kind {
        payload.insert("kind".to_string(), kind.clone().into());
    }
    if let Some(ref sig) = message.thought_signature {
        payload.insert("thought_signature".to_string(), sig.clone().into());
    }
    if !message.attachments.is_empty() {
        // Attachments serialize as a JSON string payload (spec §3): Qdrant payload
        // values don't nest arbitrary structs cleanly, so we round-trip through JSON.
        if let Ok(encoded) = serde_json::to_string(&message.attachments) {
            payload.insert("attachments".to_string(), encoded.into());
        }
    }
    payload
}

fn message_from_parts(
    payload: HashMap<String, QdrantValue>,
    vectors: Option<qdrant_client::qdrant::VectorsOutput>,
    chat_id: &str,
    collection: Collection,
) -> Option<Message> {
    let role_str = payload.get("role")?.as_str()?.to_string();
    let role = role_str.parse::<Role>().unwrap_or(Role::Document);
    let content = payload.get("content")?.as_str()?.to_string();
    let timestamp_millis = payload.get("timestamp")?.as_integer()?;
    let timestamp = chrono::DateTime::from_timestamp_millis(timestamp_millis)?.with_timezone(&chrono::Utc);
    let id = payload
        .get("message_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let kind = payload.get("kind").and_then(|v| v.as_str()).map(String::from);
    let thought_signature = payload.get("thought_signature").and_then(|v| v.as_str()).map(String::from);
    let attachments = payload
        .get("attachments")
        .and_then(|v| v.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    let embedding = vectors.and_then(|v| match v.vectors_options {
        Some(VectorsOptions::Vector(vec)) => match vec.into_vector() {
            VectorOutput::Dense(dense) => Some(dense.data),
            _ => None,
        },
        _ => None,
    });

    Some(Message {
        id,
        chat_id: chat_id.to_string(),
        collection,
        role,
        content,
        timestamp,
        embedding,
        attachments,
        kind,
        thought_signature,
    })
}

fn point_to_message(point: qdrant_client::qdrant::ScoredPoint, chat_id: &str, collection: Collection) -> Option<Message> {
    message_from_parts(point.payload, point.vectors, chat_id, collection)
}

fn retrieved_point_to_message(
    point: qdrant_client::qdrant::RetrievedPoint,
    chat_id: &str,
    collection: Collection,
) -> Option<Message> {
    message_from_parts(point.payload, point.vectors, chat_id, collection)
}
