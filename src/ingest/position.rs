// src/ingest/position.rs
//! Ordering values: extraction from records, comparison, and event time.
//!
//! Positions stay strings end to end. ISO-8601 values compare correctly as
//! strings only while every value shares one precision and one timezone;
//! `2016-01-02T00:00:00` sorts *before* `2016-01-02T00:00:00.000`. Mixed shapes
//! are reported via [`same_shape`], never rewritten.

use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde_json::Value;

use crate::error::{IngestError, Result};
use crate::ingest::types::{NaiveTz, Record};

/// Position string of `record[field]`.
pub fn order_value(record: &Record, field: &str) -> Result<String> {
    match record.get(field) {
        None | Some(Value::Null) => Err(IngestError::MissingOrderField {
            field: field.to_string(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(IngestError::InvalidTimestamp {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Numeric when both sides are finite numbers, lexicographic otherwise.
pub fn compare_positions(a: &str, b: &str) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn as_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Interpret an ordering value as a point in time.
///
/// Values without an offset are read in `tz`; RFC 3339 values keep their own.
pub fn parse_event_time(value: &str, tz: NaiveTz) -> Option<DateTime<Utc>> {
    let v = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f") {
        return resolve_naive(dt, tz);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).and_then(|dt| resolve_naive(dt, tz));
    }
    let secs = as_number(v)?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn resolve_naive(dt: NaiveDateTime, tz: NaiveTz) -> Option<DateTime<Utc>> {
    match tz {
        NaiveTz::Utc => Some(dt.and_utc()),
        // ambiguous (DST fold) -> earliest; inside a DST gap -> roll forward an hour
        NaiveTz::Local => dt
            .and_local_timezone(Local)
            .earliest()
            .or_else(|| (dt + TimeDelta::hours(1)).and_local_timezone(Local).earliest())
            .map(|t| t.with_timezone(&Utc)),
    }
}

/// True when two timestamp positions share length and timezone marker,
/// i.e. when string comparison between them is trustworthy.
pub fn same_shape(a: &str, b: &str) -> bool {
    if as_number(a).is_some() && as_number(b).is_some() {
        return true;
    }
    let tz = |s: &str| s.ends_with('Z') || s.rfind(['+', '-']).is_some_and(|i| i > 18);
    a.len() == b.len() && tz(a) == tz(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn extracts_strings_and_numbers() {
        let r = rec(json!({"when": "2016-01-02T00:00:00.000", "seq": 42}));
        assert_eq!(order_value(&r, "when").unwrap(), "2016-01-02T00:00:00.000");
        assert_eq!(order_value(&r, "seq").unwrap(), "42");
    }

    #[test]
    fn missing_or_null_field_is_an_error() {
        let r = rec(json!({"when": null}));
        assert!(matches!(
            order_value(&r, "when"),
            Err(IngestError::MissingOrderField { .. })
        ));
        assert!(matches!(
            order_value(&r, "other"),
            Err(IngestError::MissingOrderField { .. })
        ));
    }

    #[test]
    fn iso_strings_compare_lexicographically() {
        assert_eq!(
            compare_positions("2016-01-02T00:00:00.000", "2016-01-03T00:00:00.000"),
            Ordering::Less
        );
        assert_eq!(compare_positions("2016-01-03", "2016-01-03"), Ordering::Equal);
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(compare_positions("9", "10"), Ordering::Less);
        assert_eq!(compare_positions("10.5", "10"), Ordering::Greater);
    }

    #[test]
    fn parses_supported_time_shapes() {
        let expect = DateTime::from_timestamp(1_451_692_800, 0).unwrap();
        let utc = NaiveTz::Utc;
        assert_eq!(parse_event_time("2016-01-02T00:00:00.000", utc), Some(expect));
        assert_eq!(parse_event_time("2016-01-02T00:00:00", utc), Some(expect));
        assert_eq!(parse_event_time("2016-01-02T01:00:00+01:00", utc), Some(expect));
        assert_eq!(parse_event_time("2016-01-02", utc), Some(expect));
        assert_eq!(parse_event_time("1451692800", utc), Some(expect));
        assert!(parse_event_time("yesterday", utc).is_none());
    }

    #[test]
    fn naive_values_follow_local_zone_by_default() {
        let naive = NaiveDate::from_ymd_opt(2016, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let expect = naive
            .and_local_timezone(Local)
            .earliest()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            parse_event_time("2016-01-02T00:00:00.000", NaiveTz::Local),
            Some(expect)
        );
        assert_eq!(parse_event_time("2016-01-02", NaiveTz::Local), Some(expect));
    }

    #[test]
    fn explicit_offsets_and_epochs_ignore_the_naive_zone() {
        let expect = DateTime::from_timestamp(1_451_692_800, 0).unwrap();
        for tz in [NaiveTz::Local, NaiveTz::Utc] {
            assert_eq!(parse_event_time("2016-01-02T00:00:00Z", tz), Some(expect));
            assert_eq!(parse_event_time("1451692800", tz), Some(expect));
        }
    }

    #[test]
    fn keeps_subsecond_precision() {
        let t = parse_event_time("2016-01-02T00:00:00.250", NaiveTz::Utc).unwrap();
        assert_eq!(t.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn shape_detects_mixed_precision() {
        assert!(same_shape("2016-01-02T00:00:00.000", "2016-01-03T00:00:00.000"));
        assert!(!same_shape("2016-01-02T00:00:00", "2016-01-02T00:00:00.000"));
        assert!(!same_shape("2016-01-02T00:00:00.00Z", "2016-01-02T00:00:00.000"));
        assert!(same_shape("9", "10"));
    }
}
