//! Time source for cache entry timestamps.
//!
//! Entries record their creation time in milliseconds since the Unix epoch and ages
//! are computed against a [`Clock`], so tests can move time deterministically.

use std::time::Duration;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Age of a timestamp taken from this clock. Timestamps in the future count as zero.
    fn age_of(&self, timestamp_millis: i64) -> Duration {
        let elapsed = self.now_millis().saturating_sub(timestamp_millis);
        Duration::from_millis(u64::try_from(elapsed).unwrap_or(0))
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Render an entry timestamp for humans, e.g. `2026-01-31 12:00:00 UTC`.
pub fn format_timestamp(timestamp_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_millis)
        .map_or_else(|| timestamp_millis.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(i64);

    impl Clock for Fixed {
        fn now_millis(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn test_age_of() {
        let clock = Fixed(10_000);
        assert_eq!(clock.age_of(4_000), Duration::from_secs(6));
        assert_eq!(clock.age_of(20_000), Duration::ZERO);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }
}
