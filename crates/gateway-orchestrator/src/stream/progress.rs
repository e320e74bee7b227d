use std::time::{Duration, Instant};

/// `{elapsed, tokensPerSec, estimatedRemaining?, percentComplete?}`
/// (spec.md §4.C "Progress tracker").
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub tokens_per_sec: f64,
    pub estimated_remaining: Option<Duration>,
    pub percent_complete: Option<f64>,
}

/// Fires a progress callback at most every `progress_interval`, computed
/// from cumulative token counts since `new`.
pub struct ProgressTracker {
    started_at: Instant,
    last_fired_at: Option<Instant>,
    progress_interval: Duration,
    total_tokens: Option<u64>,
    tokens_so_far: u64,
}

impl ProgressTracker {
    pub fn new(progress_interval: Duration, total_tokens: Option<u64>) -> Self {
        Self {
            started_at: Instant::now(),
            last_fired_at: None,
            progress_interval,
            total_tokens,
            tokens_so_far: 0,
        }
    }

    /// Updates cumulative progress; returns a snapshot only if at least
    /// `progress_interval` has elapsed since the last one.
    pub fn update(&mut self, n_tokens: u64) -> Option<ProgressSnapshot> {
        self.tokens_so_far += n_tokens;
        let now = Instant::now();
        if let Some(last) = self.last_fired_at {
            if now.duration_since(last) < self.progress_interval {
                return None;
            }
        }
        self.last_fired_at = Some(now);

        let elapsed = now.duration_since(self.started_at);
        let tokens_per_sec = if elapsed.as_secs_f64() > 0.0 {
            self.tokens_so_far as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let (estimated_remaining, percent_complete) = match self.total_tokens {
            Some(total) if tokens_per_sec > 0.0 => {
                let remaining_tokens = total.saturating_sub(self.tokens_so_far) as f64;
                (
                    Some(Duration::from_secs_f64(remaining_tokens / tokens_per_sec)),
                    Some((self.tokens_so_far as f64 / total as f64 * 100.0).min(100.0)),
                )
            }
            _ => (None, None),
        };

        Some(ProgressSnapshot { elapsed, tokens_per_sec, estimated_remaining, percent_complete })
    }
}
