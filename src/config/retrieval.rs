// src/config/retrieval.rs
// Retrieval pipeline constants (C4) - adaptive re-scoring and quota-based fusion

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// How many recent `historico` turns feed query generation.
    pub query_context_turns: usize,
    /// Candidates per collection for the direct query.
    pub direct_k: usize,
    /// Candidates per collection for the narrative query (fatos/conceitos only).
    pub narrative_k: usize,
    /// Historico penalty multiplier (>1 pushes raw dialogue down the ranking).
    pub historico_penalty: f32,
    /// Relevance threshold below which fatos/conceitos get boosted.
    pub relevance_threshold: f32,
    /// Maximum boost fraction applied at r=1.
    pub boost_max: f32,
    /// Total fused-context word budget.
    pub total_word_budget: usize,
    /// Reserved word budget for narrative-query results.
    pub narrative_word_budget: usize,
    /// Window size (in turns) of verbatim recent history sent to the model.
    pub recent_history_window: usize,
    /// Max media attachments collected into the RAG-media injection.
    pub max_rag_media: usize,
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        Self {
            query_context_turns: super::helpers::env_usize("RETRIEVAL_QUERY_CONTEXT_TURNS", 20),
            direct_k: super::helpers::env_usize("RETRIEVAL_DIRECT_K", 80),
            narrative_k: super::helpers::env_usize("RETRIEVAL_NARRATIVE_K", 50),
            historico_penalty: super::helpers::env_parsed_or("RETRIEVAL_HISTORICO_PENALTY", 1.016),
            relevance_threshold: super::helpers::env_parsed_or(
                "RETRIEVAL_RELEVANCE_THRESHOLD",
                0.7,
            ),
            boost_max: super::helpers::env_parsed_or("RETRIEVAL_BOOST_MAX", 0.62),
            total_word_budget: super::helpers::env_usize("RETRIEVAL_TOTAL_WORD_BUDGET", 5_000),
            narrative_word_budget: super::helpers::env_usize(
                "RETRIEVAL_NARRATIVE_WORD_BUDGET",
                1_500,
            ),
            recent_history_window: super::helpers::env_usize("RETRIEVAL_RECENT_WINDOW", 20),
            max_rag_media: super::helpers::env_usize("RETRIEVAL_MAX_RAG_MEDIA", 3),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            query_context_turns: 20,
            direct_k: 80,
            narrative_k: 50,
            historico_penalty: 1.016,
            relevance_threshold: 0.7,
            boost_max: 0.62,
            total_word_budget: 5_000,
            narrative_word_budget: 1_500,
            recent_history_window: 20,
            max_rag_media: 3,
        }
    }
}
