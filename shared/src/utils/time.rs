//! Time-related utilities

use once_cell::sync::Lazy;
use std::time::Instant;

use crate::types::sample::Timestamp;

/// Wall-clock instant used for human-facing metadata
pub type WallTime = chrono::DateTime<chrono::Utc>;

static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds on the process-wide monotonic clock.
///
/// Sample timestamps handed to the engine should come from this clock so
/// they are comparable with profile start and end times.
pub fn monotonic_nanos() -> Timestamp {
    CLOCK_ORIGIN.elapsed().as_nanos() as Timestamp
}

/// Current wall-clock time
pub fn wall_clock_now() -> WallTime {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_goes_backwards() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_clock_is_recent() {
        assert!(wall_clock_now().timestamp() > 1_600_000_000);
    }
}
