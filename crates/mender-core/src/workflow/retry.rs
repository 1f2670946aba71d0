//! Retry policy and backoff computation.
//!
//! Stateless: the decision depends only on the task's counters, and the
//! backoff delay only on the configured strategy and the retry number.

use std::time::Duration;

use mender_types::config::BackoffConfig;

/// Stateless retry policy for failed task attempts.
pub struct RetryPolicy;

impl RetryPolicy {
    /// Whether a failed attempt should be retried.
    ///
    /// `retry_count` is the number of retries already performed. Returns
    /// `true` iff `retry_count < max_retries`, so the attempt that would push
    /// the count past `max_retries` is the one that fails terminally.
    pub fn should_retry(retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }

    /// Delay before retry number `retry` (1-based: the first retry is 1).
    pub fn backoff_delay(backoff: &BackoffConfig, retry: u32) -> Duration {
        match *backoff {
            BackoffConfig::None => Duration::ZERO,
            BackoffConfig::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffConfig::Exponential { base_ms, max_ms } => {
                let shift = retry.saturating_sub(1).min(32);
                let factor = 1u64 << shift;
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}
