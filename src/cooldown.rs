// src/cooldown.rs
// Per-key and per-(key,model) cooldown registries shared by the embedding
// service (C2) and LLM provider dispatch (C3), per spec §4.8/§7. Grounded on
// utils::rate_limiter's governor-based RateLimiter for the "wait until ready"
// idiom, generalized here to an explicit until-timestamp registry since
// cooldowns are minutes/hours long, not a token bucket.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::KeyStatus;
use crate::utils::timestamp::get_timestamp;

/// Why a key went into cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownReason {
    /// A provider signaled a daily/quota-exhaustion error.
    DailyQuota,
    /// A provider signaled a transient 429/rate-limit error.
    Temporary,
}

#[derive(Debug, Clone)]
struct CooldownEntry {
    until: i64,
    reason: CooldownReason,
}

/// Tracks cooldowns keyed by an arbitrary string (a raw API key label, or a
/// "{key}:{model}" composite for per-(key,model) scoping).
#[derive(Default)]
pub struct CooldownRegistry {
    entries: RwLock<HashMap<String, CooldownEntry>>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, key: &str, reason: CooldownReason, duration_secs: i64) {
        let until = get_timestamp() + duration_secs;
        self.entries.write().insert(key.to_string(), CooldownEntry { until, reason });
        crate::metrics::record_cooldown_event(
            key,
            match reason {
                CooldownReason::DailyQuota => "daily_quota",
                CooldownReason::Temporary => "temporary",
            },
        );
    }

    pub fn is_cooling_down(&self, key: &str) -> bool {
        self.remaining_secs(key) > 0
    }

    pub fn remaining_secs(&self, key: &str) -> i64 {
        match self.entries.read().get(key) {
            Some(entry) => (entry.until - get_timestamp()).max(0),
            None => 0,
        }
    }

    /// The first key in `candidates` not currently cooling down, round-robin
    /// style (first-available, not load-balanced) per spec §4.2/§4.3 key rotation.
    pub fn first_available<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        candidates.iter().map(|s| s.as_str()).find(|k| !self.is_cooling_down(k))
    }

    /// Snapshot of all candidates' cooldown state, for the `AllKeysExhausted` error.
    pub fn status_for(&self, candidates: &[String]) -> Vec<KeyStatus> {
        candidates
            .iter()
            .map(|k| KeyStatus {
                key_label: redact(k),
                cooldown_remaining_secs: self.remaining_secs(k),
            })
            .collect()
    }
}

/// Keys are never logged or surfaced in full; only a short suffix identifies them.
fn redact(key: &str) -> String {
    if key.len() <= 6 {
        "***".to_string()
    } else {
        format!("***{}", &key[key.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_key_is_unavailable_until_expiry() {
        let reg = CooldownRegistry::new();
        reg.mark("k1", CooldownReason::Temporary, 60);
        assert!(reg.is_cooling_down("k1"));
        assert!(reg.remaining_secs("k1") > 0);
        assert!(!reg.is_cooling_down("k2"));
    }

    #[test]
    fn first_available_skips_cooling_keys() {
        let reg = CooldownRegistry::new();
        let keys = vec!["a".to_string(), "b".to_string()];
        reg.mark("a", CooldownReason::DailyQuota, 86400);
        assert_eq!(reg.first_available(&keys), Some("b"));
    }

    #[test]
    fn all_keys_exhausted_reports_status() {
        let reg = CooldownRegistry::new();
        let keys = vec!["abcdefgh".to_string()];
        reg.mark("abcdefgh", CooldownReason::Temporary, 2);
        let status = reg.status_for(&keys);
        assert_eq!(status.len(), 1);
        assert!(status[0].key_label.starts_with("***"));
    }
}
