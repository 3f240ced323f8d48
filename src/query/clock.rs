//! Time source for query timestamps.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;

/// Produces Unix-epoch millisecond timestamps for a single cache.
///
/// The clock is anchored to the wall clock when it is created and then advanced by the
/// tokio monotonic clock. Timestamps therefore serialize meaningfully across a
/// server/client boundary, while paused tokio time (in tests) moves them forward exactly
/// like it moves timers.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_millis: i64,
    base_instant: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        let base_millis = i64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(0);
        Self {
            base_millis,
            base_instant: Instant::now(),
        }
    }

    /// Current time in Unix-epoch milliseconds.
    pub fn now_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.base_instant.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base_millis.saturating_add(elapsed)
    }

    /// Time left until `deadline_millis`, zero if it already passed.
    pub fn until(&self, deadline_millis: i64) -> Duration {
        let remaining = deadline_millis.saturating_sub(self.now_millis());
        Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a duration into whole milliseconds, saturating at `i64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
