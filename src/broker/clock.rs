//! Monotonic nanosecond clock anchored to the wall clock.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Timestamps for entries, deadlines, and trace events.
///
/// `now_ns` is monotonic within one broker run (it advances with
/// `Instant`, the wall clock only seeds the origin), so enqueue
/// timestamps and transfer deadlines never go backwards even if the
/// system clock is stepped.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
    origin_ns: u64,
}

impl Clock {
    pub fn new() -> Self {
        // Falls back to 0 if the system clock reads before the epoch.
        let origin_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            origin_ns,
        }
    }

    /// Nanoseconds since the Unix epoch.
    pub fn now_ns(&self) -> u64 {
        self.origin_ns + self.origin.elapsed().as_nanos() as u64
    }

    /// Wall-clock seconds, for trace event timestamps.
    pub fn wall_seconds(&self) -> f64 {
        self.now_ns() as f64 / 1e9
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
