//! Backoff and pacing helpers shared by the crawl and download pools

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// `base * 2^attempt`, capped, plus up to `1/jitter_percent` of random jitter
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl ExponentialBackoff {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped_delay = exponential_delay.min(self.max_ms);
        let jitter = if self.jitter_percent > 0 {
            rand::thread_rng().gen_range(0..capped_delay / self.jitter_percent + 1)
        } else {
            0
        };
        Duration::from_millis(capped_delay + jitter)
    }
}

/// A uniformly random delay in `[min_ms, max_ms]`
pub fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Sleeps for `duration` unless `cancel` fires first
///
/// Returns false if the sleep was cut short by cancellation.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
