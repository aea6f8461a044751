//! Wall-clock abstraction shared by the rate limiter and the circuit breakers.
//!
//! Minute windows and cool-down periods are derived from milliseconds since
//! the Unix epoch, so tests can move time forward without sleeping.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MILLIS_PER_MINUTE: u64 = 60_000;

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// The integer minute epoch used as the rate limit window.
    fn minute_epoch(&self) -> u64 {
        self.now_millis() / MILLIS_PER_MINUTE
    }

    /// Time remaining until the next minute window starts.
    fn until_next_minute(&self) -> Duration {
        let elapsed = self.now_millis() % MILLIS_PER_MINUTE;
        Duration::from_millis(MILLIS_PER_MINUTE - elapsed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}
