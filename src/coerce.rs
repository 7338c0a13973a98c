//! Coercion of raw store values into the shape the destination deserializes from.
//!
//! Flags and environment variables only ever produce strings, while config
//! files produce whatever their format allows. Before deserialization every
//! leaf is run through [`coerce`], which dispatches on the leaf's [`Kind`]:
//!
//! - scalars accept their native type or a parseable string;
//! - durations accept unit strings (`1h30m`, `300ms`) or integer
//!   nanoseconds and become `{ secs, nanos }` tables;
//! - timestamps accept RFC 3339 strings or TOML datetimes;
//! - slices accept arrays or a delimited list (`"a,b,c"`, optionally in `[]`);
//! - byte blobs accept standard base64;
//! - structured slices accept an embedded JSON document;
//! - maps accept tables or `k=v` pairs (`"a=1,b=2"`).
//!
//! Every failure names the offending literal and key.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset};
use toml::{Table, Value};

use crate::error::ConfxError;
use crate::types::{Kind, MapValue, Scalar};

/// Separators used when splitting delimited strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Separators {
    /// Between slice elements and between map pairs.
    pub list: String,
    /// Between a map key and its value.
    pub key_value: String,
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            list: ",".to_string(),
            key_value: "=".to_string(),
        }
    }
}

/// Coerce a raw store value for a leaf of the given kind.
pub fn coerce(kind: Kind, value: Value, key: &str, seps: &Separators) -> Result<Value, ConfxError> {
    match kind {
        Kind::Scalar(scalar) => coerce_scalar(scalar, value, key),
        Kind::Bytes => coerce_bytes(value, key),
        Kind::Slice(element) => match value {
            Value::String(s) => string_to_slice(&s, element, key, seps).map(Value::Array),
            Value::Array(items) => items
                .into_iter()
                .map(|item| coerce_scalar(element, item, key))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Table(_) => Err(mismatch(key, &value, "a list")),
            single => Ok(Value::Array(vec![coerce_scalar(element, single, key)?])),
        },
        Kind::Json => match value {
            Value::String(s) => {
                let json: serde_json::Value = serde_json::from_str(&s)
                    .map_err(|e| ConfxError::parse(key, s.as_str(), format!("invalid json: {e}")))?;
                match json_to_toml(json) {
                    Some(array @ Value::Array(_)) => Ok(array),
                    Some(Value::Table(table)) => Ok(Value::Array(vec![Value::Table(table)])),
                    _ => Err(ConfxError::parse(key, s, "expected a json array")),
                }
            }
            Value::Array(_) => Ok(value),
            Value::Table(table) => Ok(Value::Array(vec![Value::Table(table)])),
            other => Err(mismatch(key, &other, "a json array")),
        },
        Kind::Map(map_value) => match value {
            Value::String(s) => string_to_map(&s, map_value, key, seps).map(Value::Table),
            Value::Array(items) => {
                let mut merged = Table::new();
                for item in items {
                    let Value::String(s) = item else {
                        return Err(mismatch(key, &item, "key=value pairs"));
                    };
                    merged.extend(string_to_map(&s, map_value, key, seps)?);
                }
                Ok(Value::Table(merged))
            }
            Value::Table(table) => {
                let mut out = Table::new();
                for (k, v) in table {
                    let entry_key = format!("{key}.{k}");
                    out.insert(k, coerce_scalar(map_value.scalar(), v, &entry_key)?);
                }
                Ok(Value::Table(out))
            }
            other => Err(mismatch(key, &other, "a table or key=value pairs")),
        },
    }
}

/// Split a delimited list into coerced elements.
///
/// Surrounding `[` `]` are dropped. Blank input yields an empty list, never a
/// single zero element. Non-string elements are trimmed before parsing.
pub fn string_to_slice(
    input: &str,
    element: Scalar,
    key: &str,
    seps: &Separators,
) -> Result<Vec<Value>, ConfxError> {
    let inner = strip_brackets(input);
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(seps.list.as_str())
        .map(|part| {
            let item = if element == Scalar::String {
                part
            } else {
                part.trim()
            };
            coerce_scalar(element, Value::String(item.to_string()), key)
        })
        .collect()
}

/// Split `k=v` pairs into a table of coerced values.
///
/// Each pair is split on the first key/value separator, so values may contain
/// it. String values are kept verbatim; integer values are trimmed.
pub fn string_to_map(
    input: &str,
    value: MapValue,
    key: &str,
    seps: &Separators,
) -> Result<Table, ConfxError> {
    let inner = strip_brackets(input);
    let mut table = Table::new();
    if inner.trim().is_empty() {
        return Ok(table);
    }
    for pair in inner.split(seps.list.as_str()) {
        let Some((k, v)) = pair.split_once(seps.key_value.as_str()) else {
            return Err(ConfxError::parse(key, pair, "invalid key-value pair"));
        };
        let raw = match value {
            MapValue::String => v,
            MapValue::Int | MapValue::Int64 => v.trim(),
        };
        let entry_key = format!("{key}.{k}");
        let coerced = coerce_scalar(value.scalar(), Value::String(raw.to_string()), &entry_key)?;
        table.insert(k.to_string(), coerced);
    }
    Ok(table)
}

fn strip_brackets(input: &str) -> &str {
    input.trim().trim_matches(|c| c == '[' || c == ']')
}

fn coerce_scalar(scalar: Scalar, value: Value, key: &str) -> Result<Value, ConfxError> {
    match scalar {
        Scalar::Bool => match value {
            Value::Boolean(_) => Ok(value),
            Value::Integer(i) => Ok(Value::Boolean(i != 0)),
            Value::String(s) => parse_bool(s.trim())
                .map(Value::Boolean)
                .ok_or_else(|| ConfxError::parse(key, s, "invalid syntax")),
            other => Err(mismatch(key, &other, "a boolean")),
        },
        Scalar::I8
        | Scalar::I16
        | Scalar::I32
        | Scalar::I64
        | Scalar::Isize
        | Scalar::U8
        | Scalar::U16
        | Scalar::U32
        | Scalar::U64
        | Scalar::Usize => coerce_integer(scalar, value, key),
        Scalar::F32 | Scalar::F64 => match value {
            Value::Float(_) => Ok(value),
            Value::Integer(i) => Ok(Value::Float(i as f64)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| ConfxError::parse(key, s, e)),
            other => Err(mismatch(key, &other, "a number")),
        },
        Scalar::String => match value {
            Value::String(_) => Ok(value),
            Value::Integer(i) => Ok(Value::String(i.to_string())),
            Value::Float(f) => Ok(Value::String(f.to_string())),
            Value::Boolean(b) => Ok(Value::String(b.to_string())),
            Value::Datetime(d) => Ok(Value::String(d.to_string())),
            other => Err(mismatch(key, &other, "a string")),
        },
        Scalar::Duration => match value {
            Value::String(s) => parse_duration(&s)
                .map(duration_table)
                .map_err(|reason| ConfxError::parse(key, s, reason)),
            Value::Integer(n) => u64::try_from(n)
                .map(|n| duration_table(Duration::from_nanos(n)))
                .map_err(|_| ConfxError::parse(key, n.to_string(), "negative durations are not supported")),
            Value::Table(t) if t.contains_key("secs") => Ok(Value::Table(t)),
            other => Err(mismatch(key, &other, "a duration")),
        },
        Scalar::Timestamp => {
            let text = match value {
                Value::String(s) => s,
                Value::Datetime(d) => d.to_string(),
                other => return Err(mismatch(key, &other, "an RFC 3339 timestamp")),
            };
            parse_timestamp(&text)
                .map(|t| Value::String(t.to_rfc3339()))
                .map_err(|reason| ConfxError::parse(key, text, reason))
        }
    }
}

fn coerce_integer(scalar: Scalar, value: Value, key: &str) -> Result<Value, ConfxError> {
    let (literal, parsed): (String, Option<i128>) = match value {
        Value::Integer(i) => (i.to_string(), Some(i128::from(i))),
        Value::Boolean(b) => (b.to_string(), Some(i128::from(b))),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => (f.to_string(), Some(f as i128)),
        Value::String(s) => {
            let parsed = s.trim().parse::<i128>().ok();
            (s, parsed)
        }
        other => return Err(mismatch(key, &other, "an integer")),
    };
    let Some(n) = parsed else {
        return Err(ConfxError::parse(key, literal, "invalid syntax"));
    };
    let (min, max) = integer_bounds(scalar);
    if n < min || n > max {
        return Err(ConfxError::parse(
            key,
            literal,
            format!("out of range for {}", scalar.label()),
        ));
    }
    // Above i64::MAX (u64 and usize only) the store keeps the decimal form;
    // decoding turns it back into a number.
    Ok(i64::try_from(n).map_or_else(|_| Value::String(n.to_string()), Value::Integer))
}

fn integer_bounds(scalar: Scalar) -> (i128, i128) {
    match scalar {
        Scalar::I8 => (i8::MIN.into(), i8::MAX.into()),
        Scalar::I16 => (i16::MIN.into(), i16::MAX.into()),
        Scalar::I32 => (i32::MIN.into(), i32::MAX.into()),
        Scalar::U8 => (0, u8::MAX.into()),
        Scalar::U16 => (0, u16::MAX.into()),
        Scalar::U32 => (0, u32::MAX.into()),
        Scalar::U64 | Scalar::Usize => (0, u64::MAX.into()),
        _ => (i64::MIN.into(), i64::MAX.into()),
    }
}

fn coerce_bytes(value: Value, key: &str) -> Result<Value, ConfxError> {
    match value {
        Value::String(s) => {
            let bytes = STANDARD
                .decode(strip_brackets(&s))
                .map_err(|e| ConfxError::parse(key, s.as_str(), e))?;
            Ok(Value::Array(
                bytes.into_iter().map(|b| Value::Integer(i64::from(b))).collect(),
            ))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| coerce_scalar(Scalar::U8, item, key))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Err(mismatch(key, &other, "base64 data")),
    }
}

fn mismatch(key: &str, value: &Value, expected: &str) -> ConfxError {
    let literal = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ConfxError::parse(key, literal, format!("expected {expected}"))
}

fn duration_table(d: Duration) -> Value {
    let mut table = Table::new();
    table.insert(
        "secs".to_string(),
        Value::Integer(i64::try_from(d.as_secs()).unwrap_or(i64::MAX)),
    );
    table.insert("nanos".to_string(), Value::Integer(i64::from(d.subsec_nanos())));
    Value::Table(table)
}

/// Boolean literals: `1 t T TRUE true True` and their false forms.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(s.trim()).map_err(|e| e.to_string())
}

/// Parse a duration such as `300ms`, `1.5h` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` needs
/// no unit. Negative durations are rejected since `Duration` is unsigned.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let mut s = input.trim();
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(format!("invalid duration {input:?}"));
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (int_part, rest) = s.split_at(int_len);
        s = rest;

        let mut frac_part = "";
        if let Some(rest) = s.strip_prefix('.') {
            let frac_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            frac_part = &rest[..frac_len];
            s = &rest[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("invalid duration {input:?}"));
        }

        let unit_len = s
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(s.len());
        if unit_len == 0 {
            return Err(format!("missing unit in duration {input:?}"));
        }
        let (unit, rest) = s.split_at(unit_len);
        s = rest;
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };

        let overflow = || format!("invalid duration {input:?}");
        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| overflow())?
        };
        total = whole
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(overflow)?;

        if !frac_part.is_empty() {
            let digits = &frac_part[..frac_part.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| overflow())?;
            let denominator = 10u128.pow(digits.len() as u32);
            total = numerator
                .checked_mul(scale)
                .map(|v| v / denominator)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(overflow)?;
        }
    }

    let nanos = u64::try_from(total).map_err(|_| format!("invalid duration {input:?}"))?;
    if negative && nanos != 0 {
        return Err(format!("negative duration {input:?} is not supported"));
    }
    Ok(Duration::from_nanos(nanos))
}

/// Render a duration the way [`parse_duration`] reads it: `1h2m3.5s`, `1m0s`,
/// `300ms`, `0s`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000_000_000 {
        let (unit, suffix) = if nanos < 1_000 {
            (1, "ns")
        } else if nanos < 1_000_000 {
            (1_000, "µs")
        } else {
            (1_000_000, "ms")
        };
        return format!("{}{suffix}", fixed_point(nanos, unit));
    }

    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3_600, (secs % 3_600) / 60, secs % 60);
    let seconds = fixed_point(
        u128::from(seconds) * 1_000_000_000 + u128::from(d.subsec_nanos()),
        1_000_000_000,
    );
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn fixed_point(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let frac = format!("{rem:0width$}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Convert a JSON value into a TOML value. Nulls are dropped; `None` when the
/// value itself is null.
pub(crate) fn json_to_toml(json: serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Boolean(b)),
        serde_json::Value::Number(n) => Some(if let Some(i) = n.as_i64() {
            Value::Integer(i)
        } else if let Some(u) = n.as_u64() {
            Value::String(u.to_string())
        } else {
            Value::Float(n.as_f64().unwrap_or(f64::NAN))
        }),
        serde_json::Value::String(s) => Some(Value::String(s)),
        serde_json::Value::Array(items) => Some(Value::Array(
            items.into_iter().filter_map(json_to_toml).collect(),
        )),
        serde_json::Value::Object(map) => Some(Value::Table(
            map.into_iter()
                .filter_map(|(k, v)| json_to_toml(v).map(|v| (k, v)))
                .collect(),
        )),
    }
}
