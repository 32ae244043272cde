//! Coercion helpers turning loosely typed proxy JSON into metric values.
//!
//! The proxy API is inconsistent about types: counters arrive as integers,
//! floats or numeric strings, and timestamps are US-style 12-hour strings
//! such as `1/2/2024 3:04:05 PM`. Anything that cannot be coerced maps to
//! `0.0` so a single odd field never fails a whole scrape.

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::trace;

/// Layout used by the proxy for timestamps with a four digit year.
pub const DATE_LAYOUT: &str = "%m/%d/%Y %I:%M:%S %p";

/// Same layout with a two digit year (`1/2/24 3:04:05 PM`).
pub const DATE_LAYOUT_SHORT_YEAR: &str = "%m/%d/%y %I:%M:%S %p";

/// Formatting counterpart of [`DATE_LAYOUT`] without zero padding.
pub const DATE_DISPLAY_LAYOUT: &str = "%-m/%-d/%Y %-I:%M:%S %p";

/// Convert a JSON value to `f64`.
///
/// Integers, floats and numeric strings are accepted. Everything else,
/// including strings that do not parse, yields `0.0`.
pub fn value_to_f64(value: &Value) -> f64 {
    let converted = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    trace!("Convert '{}' to {}", value, converted);
    converted
}

/// Parse a proxy timestamp into Unix epoch seconds (UTC).
///
/// Returns `None` when the string does not match the proxy layout.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    let date = value.split_whitespace().next()?;
    let year = date.rsplit('/').next()?;
    let layout = if year.len() == 2 {
        DATE_LAYOUT_SHORT_YEAR
    } else {
        DATE_LAYOUT
    };

    NaiveDateTime::parse_from_str(value, layout)
        .ok()
        .map(|t| t.and_utc().timestamp())
}

/// Convert a proxy timestamp to epoch seconds, `0.0` when unparseable.
pub fn date_to_unix_timestamp(value: &str) -> f64 {
    let timestamp = parse_timestamp(value).unwrap_or(0);
    trace!("Convert '{}' to timestamp {}", value, timestamp);
    timestamp as f64
}

/// Read a label value at a JSON pointer.
///
/// Strings and numbers are accepted; empty strings count as missing so that
/// no sample is ever emitted with an empty label.
pub fn label_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a number at a JSON pointer, `0.0` when missing.
pub fn number_at(value: &Value, pointer: &str) -> f64 {
    value.pointer(pointer).map(value_to_f64).unwrap_or(0.0)
}

/// Read a timestamp at a JSON pointer.
///
/// Strings go through [`date_to_unix_timestamp`]; numbers are taken as epoch
/// seconds already. Missing fields yield `0.0`.
pub fn timestamp_at(value: &Value, pointer: &str) -> f64 {
    match value.pointer(pointer) {
        Some(Value::String(s)) => date_to_unix_timestamp(s),
        Some(v @ Value::Number(_)) => value_to_f64(v),
        _ => 0.0,
    }
}
