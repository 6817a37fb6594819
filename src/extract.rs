//! Series extraction from intercepted sensor payloads.
//!
//! The site's API answers in a handful of shapes depending on the chart
//! variant. Each known shape gets its own recognizer over the parsed JSON
//! tree; recognizers are tried in priority order and the first success
//! wins. Entry normalization is tolerant: gaps and junk rows are dropped,
//! never interpolated.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::error::ExtractError;
use crate::models::{Point, SensorSeries, MIN_POINTS};

/// Sensor fields in preference order; matched by substring on entry keys.
const SENSOR_PREFERENCES: [&str; 3] = ["slabwgt", "slabvwc", "calslabvwc"];

/// Leading empty rows tolerated before the sensor key must be fixed.
const MAX_LEADING_EMPTY: usize = 20;

/// Normalize a captured payload into a `SensorSeries` for one (farm, date).
pub fn extract_series(
    payload: &Value,
    farm_id: &str,
    date: NaiveDate,
) -> Result<SensorSeries, ExtractError> {
    let mut points = recognize(payload, date)?;
    if points.len() < MIN_POINTS {
        return Err(ExtractError::TooFewPoints { got: points.len() });
    }
    // Uphold the non-decreasing time axis even if the site answered with
    // shuffled buckets.
    points.sort_by_key(|p| p.t);
    Ok(SensorSeries {
        farm_id: farm_id.to_string(),
        date,
        points,
    })
}

/// Try each known shape in priority order.
fn recognize(payload: &Value, date: NaiveDate) -> Result<Vec<Point>, ExtractError> {
    if let Some(obj) = payload.as_object() {
        // 1. `node.<id>` keyed object: per-minute entries with sensor fields
        if let Some(entries) = obj
            .iter()
            .find(|(k, _)| k.starts_with("node."))
            .and_then(|(_, v)| v.as_array())
        {
            return extract_node_entries(entries, date);
        }
        // 2. `{data: [...]}`
        if let Some(data) = obj.get("data").and_then(Value::as_array) {
            return normalize_entries(data, date);
        }
        // 3. `{series: [{data: [...]}]}`
        if let Some(data) = obj
            .get("series")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
            .and_then(|s0| s0.get("data"))
            .and_then(Value::as_array)
        {
            return normalize_entries(data, date);
        }
        // 4. `{items: [...]}`
        if let Some(items) = obj.get("items").and_then(Value::as_array) {
            return normalize_entries(items, date);
        }
        return Err(ExtractError::NoKnownShape);
    }
    // 5. root is an array
    if let Some(entries) = payload.as_array() {
        return normalize_entries(entries, date);
    }
    Err(ExtractError::NoKnownShape)
}

/// The `node.*` shape: fix one sensor key from the leading entries, then
/// read that key from every row. Rows missing the key or holding a
/// non-finite value are dropped.
fn extract_node_entries(entries: &[Value], date: NaiveDate) -> Result<Vec<Point>, ExtractError> {
    let sensor_key = fix_sensor_key(entries).ok_or(ExtractError::NoNumericSensor)?;

    let mut points = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let Some(y) = obj.get(&sensor_key).and_then(Value::as_f64) else {
            continue;
        };
        if !y.is_finite() {
            continue;
        }
        let raw_t = ["timestamp", "time", "t"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_f64));
        points.push(Point {
            t: time_axis(raw_t, date, idx),
            y,
        });
    }
    if points.is_empty() {
        return Err(ExtractError::NoNumericSensor);
    }
    Ok(points)
}

/// Scan the first `MAX_LEADING_EMPTY + 1` rows for a preferred sensor
/// field. The key found first wins for the whole series.
fn fix_sensor_key(entries: &[Value]) -> Option<String> {
    for entry in entries.iter().take(MAX_LEADING_EMPTY + 1) {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        if obj.is_empty() {
            continue;
        }
        for pref in SENSOR_PREFERENCES {
            if let Some(key) = obj.keys().find(|k| k.contains(pref)) {
                return Some(key.clone());
            }
        }
    }
    None
}

/// Generic entry normalization for the non-`node.*` shapes.
fn normalize_entries(entries: &[Value], date: NaiveDate) -> Result<Vec<Point>, ExtractError> {
    let mut points = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let point = match entry {
            // `[t, y]`
            Value::Array(pair) if pair.len() >= 2 => {
                match (pair[0].as_f64(), pair[1].as_f64()) {
                    (Some(t), Some(y)) if y.is_finite() => Some(Point {
                        t: time_axis(Some(t), date, idx),
                        y,
                    }),
                    _ => None,
                }
            }
            Value::Object(obj) => {
                if let Some(y) = obj.get("y").and_then(Value::as_f64) {
                    let raw_t = obj.get("x").and_then(Value::as_f64);
                    y.is_finite().then(|| Point {
                        t: time_axis(raw_t, date, idx),
                        y,
                    })
                } else if let Some(y) = obj.get("value").and_then(Value::as_f64) {
                    let raw_t = ["timestamp", "time"]
                        .iter()
                        .find_map(|k| obj.get(*k).and_then(Value::as_f64));
                    y.is_finite().then(|| Point {
                        t: time_axis(raw_t, date, idx),
                        y,
                    })
                } else {
                    None
                }
            }
            Value::Number(_) => entry.as_f64().filter(|y| y.is_finite()).map(|y| Point {
                t: time_axis(None, date, idx),
                y,
            }),
            _ => None,
        };
        if let Some(p) = point {
            points.push(p);
        }
    }
    if points.is_empty() && !entries.is_empty() {
        return Err(ExtractError::NoNumericSensor);
    }
    Ok(points)
}

/// Resolve an entry's time. Numeric timestamps are accepted in epoch
/// milliseconds or seconds; anything smaller falls back to the array index
/// as minutes from the date's midnight.
fn time_axis(raw: Option<f64>, date: NaiveDate, idx: usize) -> NaiveDateTime {
    let fallback = || index_time(date, idx);
    match raw {
        Some(v) if v >= 1e12 => DateTime::from_timestamp_millis(v as i64)
            .map(|dt| dt.naive_utc())
            .unwrap_or_else(fallback),
        Some(v) if v >= 1e9 => DateTime::from_timestamp(v as i64, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or_else(fallback),
        _ => fallback(),
    }
}

fn index_time(date: NaiveDate, idx: usize) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0)
        .map(|base| base + chrono::Duration::minutes(idx as i64))
        .unwrap_or_default()
}
