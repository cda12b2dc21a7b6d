//! Timestamp helpers.
//!
//! Every persisted instant is an `i64` count of microseconds since the Unix
//! epoch (UTC); calendar dates (sprint bounds, due dates) are ISO `YYYY-MM-DD`
//! strings.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Current wall-clock time in microseconds since the Unix epoch.
#[must_use]
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Convert epoch microseconds to a UTC datetime.
#[must_use]
pub fn to_datetime(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

/// UTC calendar date an instant falls on.
#[must_use]
pub fn utc_date(us: i64) -> Option<NaiveDate> {
    to_datetime(us).map(|dt| dt.date_naive())
}

/// RFC 3339 rendering used in CLI output and payloads.
#[must_use]
pub fn format_us(us: i64) -> String {
    to_datetime(us).map_or_else(
        || us.to_string(),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Parse an RFC 3339 timestamp (e.g. GitHub's `updated_at`) into epoch
/// microseconds.
#[must_use]
pub fn parse_rfc3339_us(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_micros())
}

/// Parse a calendar date, accepting either `YYYY-MM-DD` or a full RFC 3339
/// timestamp (truncated to its UTC date).
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_rfc3339_us(trimmed).and_then(utc_date))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_parsing_accepts_both_forms() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date");
        assert_eq!(parse_date("2026-03-01"), Some(expected));
        assert_eq!(parse_date("2026-03-01T23:59:00Z"), Some(expected));
        assert_eq!(parse_date("2026-03-01T23:30:00-02:00").map(|d| d.to_string()), Some("2026-03-02".into()));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn rfc3339_roundtrips_through_micros() {
        let us = parse_rfc3339_us("2026-01-02T03:04:05Z").expect("parse");
        assert_eq!(format_us(us), "2026-01-02T03:04:05Z");
        assert_eq!(utc_date(us).map(|d| d.to_string()), Some("2026-01-02".into()));
    }
}
