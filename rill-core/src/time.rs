use std::fmt;
use std::ops::Sub;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Logical time in milliseconds.
///
/// Aggregates only ever compare and subtract timestamps, so the unit is
/// whatever the record stream uses. Wall-clock values convert from
/// [`DateTime<Utc>`] as milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Start of logical time.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw millisecond value.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Raw millisecond value.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Shift by a span, saturating at the numeric bounds.
    pub fn saturating_sub_span(self, span: i64) -> Self {
        Self(self.0.saturating_sub(span))
    }

    /// Converts back into a UTC datetime when the value is in chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl Sub for Timestamp {
    type Output = i64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::Timestamp;

    #[test]
    fn converts_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.as_millis(), dt.timestamp_millis());
        assert_eq!(ts.to_datetime(), Some(dt));
    }

    #[test]
    fn difference_is_in_millis() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(10_001);
        assert_eq!(b - a, 9_001);
        assert_eq!(a - b, -9_001);
    }
}
