// src/store/associations.rs
// Optional Hebbian association table (SPEC_FULL §B.3 supplement): tracks
// co-retrieval strength between fact/concept ids within a chat so repeatedly
// co-surfaced memories can be nudged together in future fusion passes.
// Kept in-process (no persistence) since it is an enrichment, not a
// correctness-critical path.

use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct AssociationTable {
    inner: RwLock<HashMap<(Uuid, Uuid), f32>>,
}

impl AssociationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Called after a fusion pass with the ids that were surfaced together.
    pub fn reinforce(&self, ids: &[Uuid], increment: f32) {
        if ids.len() < 2 {
            return;
        }
        let mut table = self.inner.write();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let entry = table.entry(Self::key(ids[i], ids[j])).or_insert(0.0);
                *entry += increment;
            }
        }
    }

    pub fn strength(&self, a: Uuid, b: Uuid) -> f32 {
        self.inner.read().get(&Self::key(a, b)).copied().unwrap_or(0.0)
    }

    /// Ids most strongly associated with `id`, strongest first.
    pub fn related_to(&self, id: Uuid, limit: usize) -> Vec<(Uuid, f32)> {
        let table = self.inner.read();
        let mut out: Vec<(Uuid, f32)> = table
            .iter()
            .filter_map(|(&(a, b), &strength)| {
                if a == id {
                    Some((b, strength))
                } else if b == id {
                    Some((a, strength))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(limit);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinforcement_is_symmetric() {
        let table = AssociationTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.reinforce(&[a, b], 1.0);
        assert_eq!(table.strength(a, b), table.strength(b, a));
        assert_eq!(table.strength(a, b), 1.0);
    }

    #[test]
    fn related_to_ranks_by_strength() {
        let table = AssociationTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        table.reinforce(&[a, b], 1.0);
        table.reinforce(&[a, c], 3.0);
        let related = table.related_to(a, 5);
        assert_eq!(related[0].0, c);
    }
}
