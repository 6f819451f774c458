//! Time-related helpers.
//!
//! Re-exports tokio's timer primitives. `timeout` is what bounds device
//! handshakes; `now_millis`/`now_secs` stamp jobs and events.

pub use tokio::time::{interval, sleep, sleep_until, timeout, Interval, Sleep, Timeout};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Error returned by [`timeout`] when the deadline elapses.
pub use tokio::time::error::Elapsed;

/// Milliseconds since the UNIX epoch, or zero if the clock is set before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Seconds since the UNIX epoch, or zero if the clock is set before it.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
