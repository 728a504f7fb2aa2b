//! Exponential backoff policy for failed jobs.
//!
//! Pure functions and constants used by both the worker pool (to pick a
//! retry delay) and the queue (to score the retry-schedule set).

use std::time::Duration;

/// First retry happens this long after the failing attempt.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delays are capped here no matter how many attempts have failed.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

/// Compute the delay before re-admitting a job that has failed `attempts`
/// times: `base * 2^(attempts - 1)`, capped at [`MAX_RETRY_DELAY`].
///
/// `attempts <= 0` yields the base delay.
pub fn retry_delay(attempts: i32) -> Duration {
    retry_delay_with(attempts, BASE_RETRY_DELAY, MAX_RETRY_DELAY)
}

/// [`retry_delay`] with explicit base/max bounds.
pub fn retry_delay_with(attempts: i32, base: Duration, max: Duration) -> Duration {
    if attempts <= 1 {
        return base.min(max);
    }
    // Saturate the shift so absurd attempt counts cannot overflow.
    let exponent = u32::try_from(attempts - 1).unwrap_or(u32::MAX).min(32);
    let factor = 1u64 << exponent;
    let delay = base.saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX));
    delay.min(max)
}
