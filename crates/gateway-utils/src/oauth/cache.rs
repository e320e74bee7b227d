use crate::oauth::credentials::OAuthCredentials;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    creds: OAuthCredentials,
    cached_at: Instant,
}

/// Single read-write mutex guarding all providers' cached credentials
/// (spec.md §4.D "a single read-write mutex guards the cache; reads that hit
/// the cache are mutex-protected but do not perform I/O"). Grounded in the
/// teacher's preference for `parking_lot` locks over `std::sync` ones
/// throughout `querymt-utils`.
pub struct CredentialCache {
    cache_duration: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl CredentialCache {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            cache_duration,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value iff present, fresh (within `cacheDuration`),
    /// and not itself due for proactive refresh — see spec.md §4.D step (1).
    pub fn get_fresh(&self, provider: &str, now_ms: i64, refresh_threshold: Duration) -> Option<OAuthCredentials> {
        let entries = self.entries.read();
        let entry = entries.get(provider)?;
        if entry.cached_at.elapsed() >= self.cache_duration {
            return None;
        }
        if entry.creds.needs_refresh(now_ms, refresh_threshold) {
            return None;
        }
        Some(entry.creds.clone())
    }

    pub fn put(&self, provider: &str, creds: OAuthCredentials) {
        self.entries.write().insert(
            provider.to_string(),
            Entry {
                creds,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drops a provider's cached entry so the next read performs I/O.
    pub fn invalidate(&self, provider: &str) {
        self.entries.write().remove(provider);
    }
}
