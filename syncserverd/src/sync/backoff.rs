use rand::Rng;
use std::time::Duration;

/// Caller-side retry policy for the upload runner: how many consecutive
/// retryable errors are tolerated and how long to wait before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_consecutive_errors: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_consecutive_errors: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_consecutive_errors,
            base,
            max: max.max(base),
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    /// Whether another attempt is allowed after `failures` consecutive errors.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures <= self.max_consecutive_errors
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(retry, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let ceiling = base_ms.saturating_mul(1u64 << retry.min(16)).min(max_ms);
        if self.jitter && ceiling > 0 {
            // Never below half the ceiling, so retries still spread out.
            Duration::from_millis(rng.gen_range(ceiling / 2..=ceiling))
        } else {
            Duration::from_millis(ceiling)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(250), Duration::from_secs(10))
    }
}
