//! Common time helpers for insulin_core.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Spacing of CGM samples, feature-frame rows and quantized deliveries.
pub const STEP_MINUTES: f64 = 5.0;
/// Number of seconds in one hour.
pub const SECS_PER_HOUR: f64 = 3_600.0;
/// Number of seconds in one minute.
pub const SECS_PER_MINUTE: f64 = 60.0;

/// Signed hours from `start` to `end`.
#[inline]
pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    end.signed_duration_since(start).num_milliseconds() as f64 / 1_000.0 / SECS_PER_HOUR
}

/// Signed minutes from `start` to `end`.
#[inline]
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    end.signed_duration_since(start).num_milliseconds() as f64 / 1_000.0 / SECS_PER_MINUTE
}

/// Longest span `minutes` returns, about a thousand years.
const MAX_SPAN_MS: f64 = 3.2e13;

/// `chrono::Duration` for a fractional number of minutes (millisecond precision).
///
/// Non-finite input maps to zero; huge input saturates at `MAX_SPAN_MS`.
#[inline]
pub fn minutes(m: f64) -> chrono::Duration {
    if !m.is_finite() {
        return chrono::Duration::zero();
    }
    let ms = (m * 60_000.0).round().clamp(-MAX_SPAN_MS, MAX_SPAN_MS);
    chrono::Duration::milliseconds(ms as i64)
}

/// `std::time::Duration` for a non-negative fractional number of minutes.
#[inline]
pub fn std_minutes(m: f64) -> Duration {
    if !m.is_finite() || m <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(m * SECS_PER_MINUTE)
}

/// Hours spanned by a `std::time::Duration`.
#[inline]
pub fn duration_hours(d: Duration) -> f64 {
    d.as_secs_f64() / SECS_PER_HOUR
}

/// Overlap in hours of `[a_start, a_end]` and `[b_start, b_end]` (0 when disjoint).
#[inline]
pub fn overlap_hours(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> f64 {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    hours_between(start, end).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn overlap_is_zero_for_disjoint_ranges() {
        assert_eq!(overlap_hours(t(1, 0), t(2, 0), t(3, 0), t(4, 0)), 0.0);
    }

    #[test]
    fn overlap_of_nested_ranges() {
        let h = overlap_hours(t(1, 0), t(5, 0), t(2, 0), t(2, 30));
        assert!((h - 0.5).abs() < 1e-12);
    }

    #[test]
    fn minute_helpers_round_trip() {
        assert!((minutes_between(t(1, 0), t(1, 0) + minutes(4.2)) - 4.2).abs() < 1e-9);
        assert_eq!(std_minutes(-1.0), Duration::ZERO);
        assert!((duration_hours(std_minutes(30.0)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn huge_minutes_saturate() {
        assert_eq!(minutes(f64::NAN), chrono::Duration::zero());
        assert_eq!(minutes(1e18), minutes(1e15));
        assert_eq!(minutes(-1e18), -minutes(1e15));
        assert!(t(0, 0).checked_sub_signed(minutes(1e18)).is_some());
    }
}
