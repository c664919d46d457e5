/// Utility helpers shared by the codec and the schema types.
///
/// This module contains:
/// - Timestamp parsing
/// - Lenient serde field decoders
///
/// Gateways in the field disagree on how they encode serials, flags and
/// timestamps. The decoders below accept every representation seen on the
/// wire so that a firmware quirk does not turn into a validation failure.
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Epoch values above this are treated as milliseconds, below as seconds.
const EPOCH_MS_THRESHOLD: i64 = 100_000_000_000;

/// Parses a gateway timestamp.
///
/// Accepted forms:
/// - RFC 3339 (`2024-05-01T10:00:00Z`)
/// - naive `YYYY-MM-DD HH:MM:SS` (interpreted as UTC)
/// - epoch seconds or milliseconds, as number or numeric string
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(Utc.from_utc_datetime(&naive));
            }
            s.parse::<i64>().ok().and_then(from_epoch)
        }
        _ => None,
    }
}

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() >= EPOCH_MS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Reads a JSON value as an unsigned integer (number or numeric string).
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a JSON value as a float (number or numeric string).
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a JSON value as a flag (`true`, `1`, `"1"`, `"true"`).
pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Renders a JSON scalar as a map key (used by payload normalization).
pub fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn de_serial<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = Value::deserialize(d)?;
    value_as_u64(&v).ok_or_else(|| D::Error::custom(format!("invalid serial: {v}")))
}

pub(crate) fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = Value::deserialize(d)?;
    if v.is_null() {
        return Ok(false);
    }
    value_as_bool(&v).ok_or_else(|| D::Error::custom(format!("invalid flag: {v}")))
}

pub(crate) fn de_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = Value::deserialize(d)?;
    value_as_f64(&v).ok_or_else(|| D::Error::custom(format!("invalid number: {v}")))
}

pub(crate) fn de_opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let v = Value::deserialize(d)?;
    if v.is_null() {
        return Ok(None);
    }
    value_as_u64(&v)
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("invalid integer: {v}")))
}

pub(crate) fn de_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let v = Value::deserialize(d)?;
    if v.is_null() {
        return Ok(None);
    }
    value_as_f64(&v)
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("invalid number: {v}")))
}

pub(crate) fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

pub(crate) fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let v = Value::deserialize(d)?;
    parse_timestamp(&v).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {v}")))
}
