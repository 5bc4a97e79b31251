// src/retrieval/pipeline.rs
// Retrieval Pipeline (C4): dual-query generation, multi-collection search,
// adaptive re-scoring, quota-based fusion. Grounded on
// memory::features::recall_engine::context::memory_builder::MemoryContextBuilder
// (query -> hybrid search -> scored context, one orchestrating struct) and
// memory::features::recall_engine::search::hybrid_search::HybridSearch's
// parallel-fan-out-then-combine shape (here: tokio::join! per collection).

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::retrieval::RetrievalConfig;
use crate::embedding::{has_question_marker, EmbeddingService};
use crate::error::Result;
use crate::llm::dispatch::Dispatcher;
use crate::llm::GenerationOptions;
use crate::model::{Collection, Message};
use crate::store::VectorStore;

use super::fusion::{fuse, FusionOutput};
use super::rescoring::{rescore, sort_by_distance, Candidate};
use super::QueryType;

pub struct RetrievalPipeline {
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingService>,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(store: Arc<VectorStore>, embeddings: Arc<EmbeddingService>, config: RetrievalConfig) -> Self {
        Self { store, embeddings, config }
    }

    /// Builds the query-generation context text from the last N `historico`
    /// turns (spec §4.4).
    pub fn build_query_context(&self, recent_historico: &[Message]) -> String {
        build_query_context_window(recent_historico, self.config.query_context_turns)
    }

    /// One full retrieval pass for a generation turn (spec §4.4).
    pub async fn retrieve(
        &self,
        chat_id: &str,
        recent_historico: &[Message],
        user_text: &str,
        dispatcher: &Dispatcher,
        query_gen_options: GenerationOptions,
        embedding_keys: &[String],
    ) -> Result<FusionOutput> {
        let context_text = self.build_query_context(recent_historico);
        let mut queries = self
            .embeddings
            .generate_search_query(dispatcher, &context_text, query_gen_options)
            .await?;

        if has_question_marker(user_text) {
            queries.direct = format!("{} {}", queries.direct, user_text);
        }

        let direct_vector = self.embeddings.generate_embedding(&queries.direct, embedding_keys).await?;
        let narrative_vector = if queries.narrative.trim().is_empty() {
            None
        } else {
            Some(self.embeddings.generate_embedding(&queries.narrative, embedding_keys).await?)
        };

        let mut candidates = Vec::new();

        // Direct query: historico, fatos, conceitos.
        for collection in Collection::all() {
            let hits = self
                .store
                .search_by_vector(chat_id, collection, &direct_vector, self.config.direct_k)
                .await
                .unwrap_or_default();
            candidates.extend(hits.into_iter().map(|h| Candidate {
                message: h.message,
                distance: h.distance,
                original_distance: h.distance,
                query_type: QueryType::Direct,
                category: collection,
            }));
        }

        // Narrative query: fatos, conceitos only, skipping historico.
        if let Some(ref vector) = narrative_vector {
            for collection in Collection::narrative_targets() {
                let hits = self
                    .store
                    .search_by_vector(chat_id, collection, vector, self.config.narrative_k)
                    .await
                    .unwrap_or_default();
                candidates.extend(hits.into_iter().map(|h| Candidate {
                    message: h.message,
                    distance: h.distance,
                    original_distance: h.distance,
                    query_type: QueryType::Narrative,
                    category: collection,
                }));
            }
        }

        rescore(&mut candidates, &self.config);
        sort_by_distance(&mut candidates);

        let recent_ids: HashSet<Uuid> = recent_historico
            .iter()
            .rev()
            .take(self.config.recent_history_window)
            .map(|m| m.id)
            .collect();

        Ok(fuse(candidates, &recent_ids, &self.config))
    }

    /// Used by the agentic summarizer's `search_memories` tool (C5): a single
    /// free-text query against fatos/conceitos/historico, re-scored but not
    /// fused into a word budget, returned as a formatted block of text.
    pub async fn search_memories(
        &self,
        chat_id: &str,
        query: &str,
        embedding_keys: &[String],
        k: usize,
    ) -> Result<String> {
        let vector = self.embeddings.generate_embedding(query, embedding_keys).await?;
        let mut candidates = Vec::new();

        for collection in Collection::all() {
            let hits = self.store.search_by_vector(chat_id, collection, &vector, k).await.unwrap_or_default();
            candidates.extend(hits.into_iter().map(|h| Candidate {
                message: h.message,
                distance: h.distance,
                original_distance: h.distance,
                query_type: QueryType::Direct,
                category: collection,
            }));
        }

        rescore(&mut candidates, &self.config);
        sort_by_distance(&mut candidates);

        if candidates.is_empty() {
            return Ok("No matching memories found.".to_string());
        }

        Ok(candidates
            .iter()
            .take(k)
            .map(|c| format!("- [{}] [ID: {}] {}", c.message.role.as_str().to_uppercase(), c.message.id, c.message.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Free function backing `RetrievalPipeline::build_query_context`, split out
/// so it is testable without constructing the store/embedding dependencies.
fn build_query_context_window(recent_historico: &[Message], window: usize) -> String {
    recent_historico
        .iter()
        .rev()
        .take(window)
        .rev()
        .map(|m| format!("[{}] {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn query_context_keeps_only_last_n_turns_in_order() {
        let history = vec![
            Message::new("c1", Collection::Historico, Role::User, "first"),
            Message::new("c1", Collection::Historico, Role::Model, "second"),
            Message::new("c1", Collection::Historico, Role::User, "third"),
        ];

        let ctx = build_query_context_window(&history, 2);
        assert!(!ctx.contains("first"));
        assert!(ctx.contains("second"));
        assert!(ctx.contains("third"));
    }
}
