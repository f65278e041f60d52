//! Instant representation shared by source and receipt timestamps.
//!
//! Timestamps are nanoseconds since the Unix epoch held in a `u64`, which
//! keeps ordering trivial and serializes identically across formats.

use core::fmt;
use core::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, nanoseconds since the Unix epoch.
///
/// [`Timestamp::MIN`] is the minimum representable instant; every receipt
/// timestamp the gateway assigns is strictly greater than it, so a query
/// bounded by `MIN` returns the full retained history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The minimum representable instant.
    pub const MIN: Timestamp = Timestamp(0);

    /// The maximum representable instant.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Wall-clock now.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| Self(d.as_nanos() as u64))
            .unwrap_or(Self::MIN)
    }

    /// Create from nanoseconds since the epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Nanoseconds since the epoch.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Milliseconds since the epoch (truncated).
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// The next representable instant.
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        t.duration_since(UNIX_EPOCH)
            .map(|d| Self(d.as_nanos() as u64))
            .unwrap_or(Self::MIN)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_precedes_now() {
        assert!(Timestamp::MIN < Timestamp::now());
    }

    #[test]
    fn millis_conversion_truncates() {
        let t = Timestamp::from_nanos(1_500_999_999);
        assert_eq!(t.as_millis(), 1500);
        assert_eq!(Timestamp::from_millis(1500).as_nanos(), 1_500_000_000);
    }

    #[test]
    fn next_saturates_at_max() {
        assert_eq!(Timestamp(41).next(), Timestamp(42));
        assert_eq!(Timestamp::MAX.next(), Timestamp::MAX);
    }

    #[test]
    fn duration_since_never_negative() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(250);
        assert_eq!(b.duration_since(a), Duration::from_millis(150));
        assert_eq!(a.duration_since(b), Duration::ZERO);
    }

    #[test]
    fn from_system_time() {
        let t = UNIX_EPOCH + Duration::from_millis(1234);
        assert_eq!(Timestamp::from(t), Timestamp::from_millis(1234));
    }

    #[test]
    fn display_as_seconds() {
        assert_eq!(Timestamp::from_millis(1500).to_string(), "1.500000000");
    }
}
