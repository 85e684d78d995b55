//! Retry backoff policy.

use std::time::Duration;

/// Backoff schedule in seconds, indexed by failures so far. Fast retries for
/// true transients, aggressive spacing thereafter so a provider outage is not
/// hammered.
const BACKOFF_SCHEDULE: [u64; 5] = [1, 5, 30, 300, 1800];

/// Seconds to wait before the next attempt, given how many attempts have
/// failed so far. Clamped to the last schedule entry.
///
/// Pure: same input, same output.
pub fn backoff(attempts_after_failure: u32) -> Duration {
    let index = (attempts_after_failure.saturating_sub(1) as usize).min(BACKOFF_SCHEDULE.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE[index])
}
