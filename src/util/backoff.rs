//! Retry backoff with jitter, and the slow-down poll interval.

use std::time::Duration;

use rand::Rng;

/// Base retry delays in milliseconds, indexed by retry count.
///
/// Counts past the end of the table reuse the last entry.
const RETRY_BACKOFF_MS: [u64; 7] = [0, 1_000, 2_000, 4_000, 10_000, 30_000, 60_000];

/// Randomization applied around each base delay (±50%).
const JITTER: f64 = 0.5;

/// Minimum (and initial) interval between token polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum interval between token polls.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

const SLOW_DOWN_FACTOR: u32 = 2;

/// Un-jittered base delay for a retry count.
pub fn base_delay(retry_count: u32) -> Duration {
    let index = (retry_count as usize).min(RETRY_BACKOFF_MS.len() - 1);
    Duration::from_millis(RETRY_BACKOFF_MS[index])
}

/// Jittered delay before the next retry.
///
/// Always within ±50% of [`base_delay`] for the same count.
pub fn retry_delay(retry_count: u32) -> Duration {
    let base = base_delay(retry_count);
    if base.is_zero() {
        return base;
    }
    let factor = rand::rng().random_range((1.0 - JITTER)..=(1.0 + JITTER));
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// Poll interval after the server answered `slow_down`.
pub fn slow_down(interval: Duration) -> Duration {
    (interval * SLOW_DOWN_FACTOR).min(MAX_POLL_INTERVAL)
}
