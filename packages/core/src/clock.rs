//! Timestamp arithmetic that clamps instead of panicking.
//!
//! Offsets come from configuration and request parameters, so they can be
//! large enough to leave chrono's representable range.

use chrono::{DateTime, Duration, Utc};

/// `at + offset`, clamped to the latest representable instant.
pub fn saturating_after(at: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    at.checked_add_signed(offset).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - offset`, clamped to the earliest representable instant.
pub fn saturating_before(at: DateTime<Utc>, offset: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(offset).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `hours` as a duration, clamped to the longest one chrono supports.
pub fn hours(hours: i64) -> Duration {
    Duration::try_hours(hours).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_clamp_at_the_edges() {
        let now = Utc::now();
        assert_eq!(saturating_after(now, Duration::hours(1)), now + Duration::hours(1));
        assert_eq!(saturating_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_before(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(hours(i64::MAX), Duration::MAX);
        assert_eq!(hours(2), Duration::hours(2));
    }
}
