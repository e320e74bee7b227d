use serde::{Deserialize, Serialize};

/// `healthy | degraded | unhealthy` (spec.md §3 Provider.health).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// `provider.health.changed` payload (spec.md §4.E "Health").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChange {
    pub id: String,
    pub previous_status: HealthStatus,
    pub current_status: HealthStatus,
    pub reason: String,
}

/// Tracks a provider's current health behind the single mutex the caller
/// (the provider registry entry) already holds for the rest of its runtime
/// state, so transitions stay atomic (spec.md §4.E "State transitions are
/// atomic (single mutex per provider)").
pub struct HealthTracker {
    status: HealthStatus,
    last_check_ms: Option<i64>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self { status: HealthStatus::Healthy, last_check_ms: None }
    }
}

impl HealthTracker {
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn last_check_ms(&self) -> Option<i64> {
        self.last_check_ms
    }

    /// Records a heartbeat outcome; returns a [`HealthChange`] iff the
    /// status actually changed, for the caller to publish.
    pub fn record(&mut self, now_ms: i64, new_status: HealthStatus, reason: impl Into<String>, id: impl Into<String>) -> Option<HealthChange> {
        self.last_check_ms = Some(now_ms);
        if new_status == self.status {
            return None;
        }
        let previous_status = self.status;
        self.status = new_status;
        Some(HealthChange { id: id.into(), previous_status, current_status: new_status, reason: reason.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_and_reports_no_change_when_unchanged() {
        let mut tracker = HealthTracker::default();
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        assert!(tracker.record(0, HealthStatus::Healthy, "ok", "p1").is_none());
    }

    #[test]
    fn transition_produces_health_change_event_payload() {
        let mut tracker = HealthTracker::default();
        let change = tracker.record(100, HealthStatus::Unhealthy, "3 consecutive failures", "p1").unwrap();
        assert_eq!(change.previous_status, HealthStatus::Healthy);
        assert_eq!(change.current_status, HealthStatus::Unhealthy);
        assert_eq!(tracker.last_check_ms(), Some(100));
    }
}
