// src/retrieval/fusion.rs
// Quota-based fusion + context assembly (spec §4.4). Grounded on
// memory::features::recall_engine::search::hybrid_search::HybridSearch's
// "combine, dedup by id, truncate to budget" shape, generalized from a flat
// entry-count cap to a narrative-reserved word budget plus a total word cap.

use std::collections::HashSet;
use uuid::Uuid;

use crate::config::retrieval::RetrievalConfig;
use crate::model::{Attachment, Collection};

use super::rescoring::Candidate;
use super::QueryType;

/// One line of the "display memory" the UI renders, carrying the adaptive
/// re-scoring debug fields the spec requires plus the salience `kind` tag
/// (SPEC_FULL §B.1 supplement).
#[derive(Debug, Clone)]
pub struct DisplayEntry {
    pub message_id: Uuid,
    pub category: Collection,
    pub score: f32,
    pub original_distance: f32,
    pub distance: f32,
    pub kind: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct FusionOutput {
    pub context_text: String,
    pub display_memory: Vec<DisplayEntry>,
    pub rag_media: Vec<RagMediaEntry>,
}

#[derive(Debug, Clone)]
pub struct RagMediaEntry {
    pub message_id: Uuid,
    pub attachment: Attachment,
}

/// Greedily packs narrative-query candidates up to the narrative budget, then
/// direct-query candidates up to the remaining total budget, skipping ids
/// already in `exclude` (the verbatim recent-history window) and duplicates
/// already selected.
pub fn fuse(candidates: Vec<Candidate>, exclude: &HashSet<Uuid>, config: &RetrievalConfig) -> FusionOutput {
    let mut narrative: Vec<Candidate> = candidates
        .iter()
        .filter(|c| c.query_type == QueryType::Narrative && !exclude.contains(&c.message.id))
        .cloned()
        .collect();
    let mut direct: Vec<Candidate> = candidates
        .iter()
        .filter(|c| c.query_type == QueryType::Direct && !exclude.contains(&c.message.id))
        .cloned()
        .collect();

    narrative.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    direct.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected_ids = HashSet::new();
    let mut selected: Vec<Candidate> = Vec::new();
    let mut narrative_words = 0usize;
    let mut total_words = 0usize;

    for c in narrative {
        if selected_ids.contains(&c.message.id) {
            continue;
        }
        let words = c.message.word_count();
        if narrative_words + words > config.narrative_word_budget {
            continue;
        }
        if total_words + words > config.total_word_budget {
            continue;
        }
        narrative_words += words;
        total_words += words;
        selected_ids.insert(c.message.id);
        selected.push(c);
    }

    for c in direct {
        if selected_ids.contains(&c.message.id) {
            continue;
        }
        let words = c.message.word_count();
        if total_words + words > config.total_word_budget {
            continue;
        }
        total_words += words;
        selected_ids.insert(c.message.id);
        selected.push(c);
    }

    let mut rag_media = Vec::new();
    let mut context_lines = Vec::new();
    let mut display_memory = Vec::new();

    for c in &selected {
        let role_tag = c.message.role.as_str().to_uppercase();
        let mut line = format!("- [{}] [ID: {}] {}", role_tag, c.message.id, c.message.content);

        for attachment in &c.message.attachments {
            if let Some(ref desc) = attachment.rag_description {
                line.push_str(&format!(" (attachment: {desc})"));
            }
            if attachment.is_indexable_media() && rag_media.len() < config.max_rag_media {
                rag_media.push(RagMediaEntry { message_id: c.message.id, attachment: attachment.clone() });
            }
        }

        context_lines.push(line);
        display_memory.push(DisplayEntry {
            message_id: c.message.id,
            category: c.category,
            score: 1.0 / (1.0 + c.distance),
            original_distance: c.original_distance,
            distance: c.distance,
            kind: "included",
        });
    }

    // Candidates that made it past re-scoring but were dropped by dedup/budget
    // are recorded with kind="dedup-skipped" so the summarizer (C5) can see
    // what was available but omitted, per SPEC_FULL §B.1.
    for c in candidates.iter().filter(|c| !selected_ids.contains(&c.message.id) && !exclude.contains(&c.message.id)) {
        display_memory.push(DisplayEntry {
            message_id: c.message.id,
            category: c.category,
            score: 1.0 / (1.0 + c.distance),
            original_distance: c.original_distance,
            distance: c.distance,
            kind: "dedup-skipped",
        });
    }

    FusionOutput { context_text: context_lines.join("\n"), display_memory, rag_media }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Role};

    fn candidate(id_seed: u8, query_type: QueryType, words: usize, distance: f32) -> Candidate {
        let mut message = Message::new("c1", Collection::Fatos, Role::Document, "w ".repeat(words).trim());
        message.id = Uuid::from_bytes([id_seed; 16]);
        Candidate { message, distance, original_distance: distance, query_type, category: Collection::Fatos }
    }

    #[test]
    fn respects_total_and_narrative_budgets() {
        let mut config = RetrievalConfig::default();
        config.total_word_budget = 10;
        config.narrative_word_budget = 4;

        let candidates = vec![
            candidate(1, QueryType::Narrative, 3, 0.1),
            candidate(2, QueryType::Narrative, 3, 0.2),
            candidate(3, QueryType::Direct, 3, 0.1),
            candidate(4, QueryType::Direct, 3, 0.2),
        ];

        let out = fuse(candidates, &HashSet::new(), &config);
        assert!(out.display_memory.iter().filter(|d| d.kind == "included").count() <= 3);
    }

    #[test]
    fn excludes_ids_already_in_recent_window() {
        let config = RetrievalConfig::default();
        let c = candidate(9, QueryType::Direct, 2, 0.1);
        let mut exclude = HashSet::new();
        exclude.insert(c.message.id);

        let out = fuse(vec![c], &exclude, &config);
        assert!(out.display_memory.is_empty());
    }

    #[test]
    fn context_lines_include_role_and_id() {
        let config = RetrievalConfig::default();
        let c = candidate(5, QueryType::Direct, 2, 0.1);
        let id = c.message.id;
        let out = fuse(vec![c], &HashSet::new(), &config);
        assert!(out.context_text.contains(&id.to_string()));
        assert!(out.context_text.contains("[DOCUMENT]"));
    }
}
