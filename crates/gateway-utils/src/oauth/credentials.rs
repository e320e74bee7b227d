use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-provider OAuth credential tuple (spec.md §3 OAuthCredentials).
///
/// `expires_at == 0` means "no expiration". Field names here are the
/// runtime's internal shape; `super::file_store` maps each provider's
/// on-disk JSON (which differs per spec.md §6) into and out of this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Milliseconds since epoch; 0 means no expiration.
    pub expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub misc: HashMap<String, serde_json::Value>,
}

impl OAuthCredentials {
    /// A credential is expired iff it has an expiry and `now >= expires_at`
    /// (spec.md §3 invariant; `expires_at == now` counts as expired per
    /// spec.md §8 boundary behaviors).
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at != 0 && now_ms >= self.expires_at
    }

    /// Needs proactive refresh iff `now + threshold >= expires_at`.
    pub fn needs_refresh(&self, now_ms: i64, refresh_threshold: std::time::Duration) -> bool {
        self.expires_at != 0 && now_ms + refresh_threshold.as_millis() as i64 >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: i64) -> OAuthCredentials {
        OAuthCredentials {
            access_token: "tok".into(),
            refresh_token: Some("refresh".into()),
            id_token: None,
            expires_at,
            scopes: vec![],
            misc: HashMap::new(),
        }
    }

    #[test]
    fn zero_expiry_never_expires() {
        assert!(!creds(0).is_expired(i64::MAX));
    }

    #[test]
    fn expires_at_now_counts_as_expired() {
        let c = creds(1_000);
        assert!(c.is_expired(1_000));
    }

    #[test]
    fn not_yet_expired_before_the_instant() {
        let c = creds(1_000);
        assert!(!c.is_expired(999));
    }

    #[test]
    fn needs_refresh_is_monotone_once_true() {
        let c = creds(10_000);
        let threshold = std::time::Duration::from_millis(5_000);
        // True at t=6000 (6000+5000 >= 10000)...
        assert!(c.needs_refresh(6_000, threshold));
        // ...and stays true for every later t, right up to and past expiry.
        assert!(c.needs_refresh(7_000, threshold));
        assert!(c.needs_refresh(10_000, threshold));
        assert!(c.needs_refresh(50_000, threshold));
    }

    #[test]
    fn needs_refresh_false_well_before_expiry() {
        let c = creds(10_000);
        let threshold = std::time::Duration::from_millis(1_000);
        assert!(!c.needs_refresh(0, threshold));
    }
}
