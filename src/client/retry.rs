//! Bounded retry for idempotent reads.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Retry policy for `fetch` and `search`.
///
/// Writes are never passed through this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Run a read, retrying retryable failures with exponential backoff.
    pub fn read<T>(&self, operation: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match f() {
                Err(e) if e.error_code().is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(operation, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(Error::Transient { message, .. }) if attempt > 1 => {
                    return Err(Error::Transient {
                        operation: operation.to_string(),
                        message: format!("{message} (after {attempt} attempts)"),
                    });
                }
                other => return other,
            }
        }
    }
}
