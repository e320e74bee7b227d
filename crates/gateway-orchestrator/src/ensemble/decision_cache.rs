use crate::ensemble::voting::VoteOutcome;
use gateway_core::Fingerprint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    outcome: VoteOutcome,
    cached_at: Instant,
}

/// Caches an ensemble decision under its fingerprint with an
/// ensemble-specific TTL (spec.md §4.F step 7).
#[derive(Default)]
pub struct DecisionCache {
    ttl: Duration,
    entries: Mutex<HashMap<Fingerprint, Entry>>,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<VoteOutcome> {
        let entries = self.entries.lock();
        let entry = entries.get(&fingerprint)?;
        if entry.cached_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.outcome.clone())
    }

    pub fn put(&self, fingerprint: Fingerprint, outcome: VoteOutcome) {
        self.entries.lock().insert(fingerprint, Entry { outcome, cached_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::voting::VotingStrategy;
    use gateway_core::{ChatResponse, ProviderId};

    fn outcome() -> VoteOutcome {
        VoteOutcome {
            selected_provider_id: ProviderId("p".into()),
            response: ChatResponse { content: "hi".into(), usage: None, confidence: None },
            strategy: VotingStrategy::BestSingle,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn fresh_entry_is_returned() {
        let cache = DecisionCache::new(Duration::from_secs(60));
        cache.put(Fingerprint(1), outcome());
        assert!(cache.get(Fingerprint(1)).is_some());
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache = DecisionCache::new(Duration::from_millis(0));
        cache.put(Fingerprint(1), outcome());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(Fingerprint(1)).is_none());
    }
}
