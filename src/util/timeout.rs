//! Timeout helpers.

use std::time::Duration;

use tokio::time::Instant;

/// Bound a request timeout by the time left until `deadline`.
///
/// The configured timeout is kept when the deadline is unknown, already
/// passed, or further away than the timeout.
pub fn clamp_to_deadline(timeout: Duration, deadline: Option<Instant>, now: Instant) -> Duration {
    match deadline {
        Some(deadline) if deadline > now => timeout.min(deadline - now),
        _ => timeout,
    }
}
