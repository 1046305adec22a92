use std::time::Duration;

use crate::jobs::RetryPolicy;

/// Tuning for report delivery retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Automatic send attempts per recipient.
    pub max_attempts: u32,
    /// Spacing between a failed attempt and the next one.
    pub backoff: RetryPolicy,
    /// Upper bound on logs requeued by one retry sweep.
    pub sweep_batch: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: RetryPolicy::exponential(3, Duration::from_secs(60), Duration::from_secs(3600)),
            sweep_batch: 100,
        }
    }
}

impl DeliveryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff.max_attempts = self.max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = RetryPolicy::exponential(self.max_attempts, base, max.max(base));
        self
    }

    /// Delay before the attempt after `attempts` failed ones.
    pub fn retry_delay(&self, attempts: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.backoff.delay_for_attempt(attempts)).unwrap_or(chrono::Duration::MAX)
    }
}
