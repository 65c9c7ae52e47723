//! Projection of SenML records into fixed-width rows.

use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value};

use super::types::Row;
use crate::domain::job::TimeFormat;

/// Place each projected key's value at its projection index.
///
/// Keys outside the projection are dropped; projected keys missing from the
/// record stay `Null`. Timestamp keys are rendered per `time_format`.
pub fn project_record(
    record: &Map<String, Value>,
    attributes: &[String],
    time_keys: &[&str],
    time_format: TimeFormat,
) -> Row {
    let mut row = vec![Value::Null; attributes.len()];
    for (key, value) in record {
        let Some(index) = attributes.iter().position(|a| a == key) else {
            continue;
        };
        row[index] = if time_format == TimeFormat::Iso8601 && time_keys.contains(&key.as_str()) {
            epoch_to_iso(value)
        } else {
            value.clone()
        };
    }
    row
}

/// `1609459200` becomes `"2021-01-01T00:00:00.000Z"`. Fractional seconds are
/// truncated to milliseconds. Non-numeric or out-of-range values pass through.
pub fn epoch_to_iso(value: &Value) -> Value {
    let Some(seconds) = value.as_f64() else {
        return value.clone();
    };
    let millis = (seconds * 1000.0).trunc();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        return value.clone();
    }
    match DateTime::from_timestamp_millis(millis as i64) {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => value.clone(),
    }
}
