// src/retrieval/rescoring.rs
// Adaptive re-scoring (spec §4.4): biases raw vector distances by collection
// and original distance. Grounded on
// memory::features::recall_engine::scoring::composite_scorer::CompositeScorer's
// "pure function over a Vec, sort at the end" shape, generalized from a
// weighted-sum composite score to the spec's penalty/boost formula.

use crate::config::retrieval::RetrievalConfig;
use crate::model::Collection;

use super::QueryType;

/// One retrieved candidate before/after adaptive re-scoring.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub message: crate::model::Message,
    pub distance: f32,
    pub original_distance: f32,
    pub query_type: QueryType,
    pub category: Collection,
}

/// Applies spec §4.4's adaptive re-scoring in place:
/// - `historico`: distance *= historico_penalty (>1, pushes it down).
/// - `fatos`/`conceitos` below `relevance_threshold`: quadratic boost toward 0.
/// - otherwise unchanged.
pub fn rescore(candidates: &mut [Candidate], config: &RetrievalConfig) {
    for c in candidates.iter_mut() {
        c.original_distance = c.distance;

        match c.category {
            Collection::Historico => {
                c.distance *= config.historico_penalty;
            }
            Collection::Fatos | Collection::Conceitos => {
                let t = config.relevance_threshold;
                if c.distance < t {
                    let r = 1.0 - c.distance / t;
                    let boost = r * r * config.boost_max;
                    c.distance *= 1.0 - boost;
                }
            }
        }
    }
}

/// Sort candidates by re-scored distance, ascending (smaller = more similar).
pub fn sort_by_distance(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, Role};

    fn candidate(category: Collection, distance: f32) -> Candidate {
        Candidate {
            message: Message::new("c1", category, Role::Document, "x"),
            distance,
            original_distance: distance,
            query_type: QueryType::Direct,
            category,
        }
    }

    #[test]
    fn historico_is_penalized_upward() {
        let config = RetrievalConfig::default();
        let mut candidates = vec![candidate(Collection::Historico, 0.2)];
        rescore(&mut candidates, &config);
        assert!(candidates[0].distance >= candidates[0].original_distance);
    }

    #[test]
    fn fatos_below_threshold_is_boosted_downward() {
        let config = RetrievalConfig::default();
        let mut candidates = vec![candidate(Collection::Fatos, 0.1)];
        rescore(&mut candidates, &config);
        assert!(candidates[0].distance <= candidates[0].original_distance);
    }

    #[test]
    fn fatos_above_threshold_is_unchanged() {
        let config = RetrievalConfig::default();
        let mut candidates = vec![candidate(Collection::Fatos, 0.9)];
        rescore(&mut candidates, &config);
        assert_eq!(candidates[0].distance, candidates[0].original_distance);
    }

    #[test]
    fn sort_orders_ascending_by_distance() {
        let config = RetrievalConfig::default();
        let mut candidates = vec![candidate(Collection::Fatos, 0.5), candidate(Collection::Fatos, 0.1)];
        rescore(&mut candidates, &config);
        sort_by_distance(&mut candidates);
        assert!(candidates[0].distance <= candidates[1].distance);
    }
}
