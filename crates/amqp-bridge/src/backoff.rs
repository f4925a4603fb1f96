//! Shared reconnect backoff helper for C2 and C3: exponential growth from
//! `BACKOFF_INITIAL` to `BACKOFF_CEILING` with ±20% jitter (spec.md §5).

use std::time::Duration;

pub const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
pub const BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Applies ±20% jitter to `base`, used before each reconnect sleep so
/// concurrent reconnect attempts don't stay in lockstep.
pub fn jittered(base: Duration) -> Duration {
    use rand::Rng;
    let jitter = rand::thread_rng().gen_range(-20..=20);
    let millis = base.as_millis() as i64;
    let adjusted = millis + (millis * jitter / 100);
    Duration::from_millis(adjusted.max(0) as u64)
}

/// Advances `backoff` to the next exponential step, capped at the ceiling.
pub fn advance(backoff: Duration) -> Duration {
    (backoff * 2).min(BACKOFF_CEILING)
}
