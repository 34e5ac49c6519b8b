use std::time::Duration;

/// Fixed-delay retry policy for transport failures.
///
/// Every network attempt is bounded by `attempt_timeout_ms`; a timed-out
/// attempt counts as a transport failure. Failed attempts are retried up to
/// `max_retries` additional times with a fixed inter-attempt delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay_ms: u64,
    attempt_timeout_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay_ms: u64, attempt_timeout_ms: u64) -> Self {
        Self {
            max_retries,
            retry_delay_ms,
            attempt_timeout_ms: attempt_timeout_ms.max(1),
        }
    }

    /// Maximum number of additional attempts after the first one.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total number of attempts a request may take.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Fixed delay between attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Time budget for a single attempt.
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 400, 8_000)
    }
}
