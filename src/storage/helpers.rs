//! Shared helpers for storage implementations.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microsecond
//! precision, `Z` suffix) so that lexical order equals time order.

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};

use super::{Result, StorageError};

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::corrupt(table, format!("bad timestamp {raw:?}: {e}")))
}

pub fn format_date(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_date(table: &'static str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| StorageError::corrupt(table, format!("bad date {raw:?}: {e}")))
}

/// Parse a TEXT enum column.
pub fn parse_text<T>(
    table: &'static str,
    raw: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T> {
    parse(raw).ok_or_else(|| StorageError::corrupt(table, format!("unknown value {raw:?}")))
}

/// Narrow a stored INTEGER into a `u32` counter.
pub fn to_u32(table: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::corrupt(table, format!("counter out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.000001Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_ts(&a) < format_ts(&b));
        assert_eq!(parse_ts("t", &format_ts(&a)).unwrap(), a);
    }

    #[test]
    fn test_now_round_trips_exactly() {
        let ts = now();
        assert_eq!(parse_ts("t", &format_ts(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_dates() {
        let d = NaiveDate::from_ymd_opt(2026, 2, 9).unwrap();
        assert_eq!(format_date(d), "2026-02-09");
        assert_eq!(parse_date("t", "2026-02-09").unwrap(), d);
        assert!(parse_date("t", "02/09/2026").is_err());
    }

    #[test]
    fn test_to_u32_rejects_negative() {
        assert!(to_u32("t", -1).is_err());
        assert_eq!(to_u32("t", 7).unwrap(), 7);
    }
}
