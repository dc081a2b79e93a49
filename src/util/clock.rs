//! Wall-clock helpers expressed in milliseconds since the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Milliseconds elapsed since `since_ms`, saturating at zero for timestamps in the future.
#[must_use]
pub fn elapsed_ms(since_ms: u64) -> u64 {
    now_ms().saturating_sub(since_ms)
}
