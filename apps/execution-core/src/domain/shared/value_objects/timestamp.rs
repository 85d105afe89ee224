//! Timestamp value object for order tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A UTC timestamp for order lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Get the current timestamp.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse from an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Returns error if the string is not a valid RFC 3339 timestamp.
    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)?;
        Ok(Self(dt.with_timezone(&Utc)))
    }

    /// Calculate duration since another timestamp.
    #[must_use]
    pub fn duration_since(&self, other: Self) -> chrono::Duration {
        self.0 - other.0
    }

    /// This timestamp shifted forward by `duration`, saturating on overflow.
    #[must_use]
    pub fn plus(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map_or(Self(DateTime::<Utc>::MAX_UTC), Self)
    }

    /// Returns true if at least `age` has passed between this timestamp and `now`.
    #[must_use]
    pub fn is_older_than(&self, age: Duration, now: Self) -> bool {
        now.duration_since(*self)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= age)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_parse() {
        let ts = Timestamp::parse("2026-01-19T12:00:00Z").unwrap();
        assert_eq!(ts.to_string(), "2026-01-19T12:00:00+00:00");
    }

    #[test]
    fn timestamp_parse_invalid() {
        assert!(Timestamp::parse("not-a-date").is_err());
    }

    #[test]
    fn plus_and_age() {
        let start = Timestamp::parse("2026-01-19T12:00:00Z").unwrap();
        let later = start.plus(Duration::from_secs(90));
        assert_eq!(later.duration_since(start).num_seconds(), 90);
        assert!(start.is_older_than(Duration::from_secs(60), later));
        assert!(!start.is_older_than(Duration::from_secs(120), later));
    }

    #[test]
    fn future_timestamp_is_never_older() {
        let now = Timestamp::parse("2026-01-19T12:00:00Z").unwrap();
        let future = now.plus(Duration::from_secs(10));
        assert!(!future.is_older_than(Duration::ZERO, now));
    }

    #[test]
    fn plus_saturates() {
        let ts = Timestamp::now().plus(Duration::from_secs(u64::MAX));
        assert_eq!(ts, Timestamp::from(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn timestamp_serde_roundtrip() {
        let ts = Timestamp::parse("2026-01-19T12:00:00Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ts);
    }
}
