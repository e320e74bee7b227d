use std::time::{Duration, Instant};

/// {closed, open, half-open} (spec.md §3 CircuitBreaker, §4.E gate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

/// Per-provider breaker state machine. Single-writer: every mutating method
/// takes `&mut self`; callers hold the one mutex-per-provider described in
/// spec.md §5 around this type.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    successes: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    half_open_completed: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            half_open_completed: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// `breaker.allow()` (spec.md §4.E "Circuit breaker gate"). Half-open
    /// transitions out of `open` are evaluated here, atomically with
    /// admission, since both happen under the same per-provider mutex.
    pub fn allow(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Admit,
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) >= self.config.timeout {
                    self.transition_to_half_open();
                    self.half_open_in_flight += 1;
                    Admission::Admit
                } else {
                    Admission::Reject
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight + self.half_open_completed < self.config.half_open_max_requests {
                    self.half_open_in_flight += 1;
                    Admission::Admit
                } else {
                    Admission::Reject
                }
            }
        }
    }

    fn transition_to_half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.half_open_completed = 0;
    }

    fn transition_to_open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.failures = 0;
    }

    fn transition_to_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.successes = 0;
    }

    /// Records a successful call. Only `half-open` successes move the state
    /// machine (spec.md §4.E "Result recording").
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.successes += 1;
                self.failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.half_open_completed += 1;
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.success_threshold {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failing call that counts toward the breaker per
    /// [`gateway_core::GatewayError::counts_as_breaker_failure`] — rate-limit
    /// responses are filtered out before this is called (spec.md §4.E
    /// "Classification of what constitutes a failure is pluggable").
    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.failures += 1;
                if self.failures >= self.config.failure_threshold {
                    self.transition_to_open(now);
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.transition_to_open(now);
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(200),
            half_open_max_requests: 2,
        })
    }

    #[test]
    fn breaker_trips_and_recovers_per_scenario_two() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            assert_eq!(cb.allow(t0), Admission::Admit);
            cb.record_failure(t0);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.allow(t0), Admission::Reject);

        let after_timeout = t0 + Duration::from_millis(200);
        assert_eq!(cb.allow(after_timeout), Admission::Admit);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.allow(t0);
            cb.record_failure(t0);
        }
        let after_timeout = t0 + Duration::from_millis(200);
        cb.allow(after_timeout);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure(after_timeout);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_at_most_max_requests() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.allow(t0);
            cb.record_failure(t0);
        }
        let after_timeout = t0 + Duration::from_millis(200);
        assert_eq!(cb.allow(after_timeout), Admission::Admit);
        assert_eq!(cb.allow(after_timeout), Admission::Admit);
        assert_eq!(cb.allow(after_timeout), Admission::Reject);
    }

    #[test]
    fn exactly_timeout_elapsed_admits_and_becomes_half_open() {
        let mut cb = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            cb.allow(t0);
            cb.record_failure(t0);
        }
        let exact = t0 + Duration::from_millis(200);
        assert_eq!(cb.allow(exact), Admission::Admit);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }
}
