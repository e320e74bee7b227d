use std::future::Future;
use std::time::Duration;

/// Paces downstream delivery at a fixed token rate, sleeping between
/// emissions (spec.md §4.C "Rate limiter"). Cancelable via `cancel`.
pub struct RateLimiter {
    interval_per_token: Duration,
}

impl RateLimiter {
    pub fn new(tokens_per_second: f64) -> Self {
        let interval_per_token = if tokens_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / tokens_per_second)
        } else {
            Duration::ZERO
        };
        Self { interval_per_token }
    }

    /// Sleeps long enough to admit `n_tokens` at the configured rate, or
    /// returns early if `cancel` resolves first.
    pub async fn pace(&self, n_tokens: u64, cancel: impl Future<Output = ()>) {
        if self.interval_per_token.is_zero() || n_tokens == 0 {
            return;
        }
        let delay = self.interval_per_token * n_tokens as u32;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel => {}
        }
    }
}
