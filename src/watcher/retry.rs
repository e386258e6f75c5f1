use std::time::Duration;

use crate::store::StoreError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded exponential backoff for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    /// No retries: every store error ends the process.
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// `attempt` counts the retries already made, starting at zero.
    pub fn should_retry(&self, attempt: u32, error: &StoreError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(MAX_BACKOFF, |backoff| backoff.min(MAX_BACKOFF))
    }
}
