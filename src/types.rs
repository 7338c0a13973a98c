//! Leaf classification and the per-leaf descriptors produced by the schema walk.
//!
//! Every leaf of a configuration struct is classified once, at initialization,
//! into a [`Kind`]. Coercion ([`coerce`](crate::coerce)) and flag registration
//! ([`flags`](crate::flags)) both dispatch on this closed set, so supporting a
//! new leaf type means adding a variant and handling it in both places.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset};
use toml::{Table, Value};

use crate::coerce::{format_duration, json_to_toml};

/// Scalar leaf types, also used as the element type of typed slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Bool,
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
    String,
    Duration,
    Timestamp,
}

impl Scalar {
    pub fn label(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::I8 => "i8",
            Scalar::I16 => "i16",
            Scalar::I32 => "i32",
            Scalar::I64 => "i64",
            Scalar::Isize => "isize",
            Scalar::U8 => "u8",
            Scalar::U16 => "u16",
            Scalar::U32 => "u32",
            Scalar::U64 => "u64",
            Scalar::Usize => "usize",
            Scalar::F32 => "f32",
            Scalar::F64 => "f64",
            Scalar::String => "string",
            Scalar::Duration => "duration",
            Scalar::Timestamp => "timestamp",
        }
    }

    pub(crate) fn is_integer(self) -> bool {
        matches!(
            self,
            Scalar::I8
                | Scalar::I16
                | Scalar::I32
                | Scalar::I64
                | Scalar::Isize
                | Scalar::U8
                | Scalar::U16
                | Scalar::U32
                | Scalar::U64
                | Scalar::Usize
        )
    }
}

/// Value type of a string-keyed map leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapValue {
    /// `i32`
    Int,
    /// `i64`
    Int64,
    String,
}

impl MapValue {
    pub fn label(self) -> &'static str {
        match self {
            MapValue::Int => "i32",
            MapValue::Int64 => "i64",
            MapValue::String => "string",
        }
    }

    pub(crate) fn scalar(self) -> Scalar {
        match self {
            MapValue::Int => Scalar::I32,
            MapValue::Int64 => Scalar::I64,
            MapValue::String => Scalar::String,
        }
    }
}

/// Classification of a leaf setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Scalar(Scalar),
    /// `Vec<u8>`, carried as standard base64 in flags and env vars.
    Bytes,
    /// Homogeneous list of scalars.
    Slice(Scalar),
    /// List of structured elements, carried as an embedded JSON document.
    Json,
    /// String-keyed map.
    Map(MapValue),
}

impl Kind {
    pub fn label(self) -> String {
        match self {
            Kind::Scalar(s) => s.label().to_string(),
            Kind::Bytes => "bytes".to_string(),
            Kind::Slice(s) => format!("[]{}", s.label()),
            Kind::Json => "json".to_string(),
            Kind::Map(v) => format!("map[string]{}", v.label()),
        }
    }
}

/// A concrete leaf value, as read from a default instance or a loaded config.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Duration(Duration),
    Timestamp(DateTime<FixedOffset>),
    Bytes(Vec<u8>),
    List(Vec<LeafValue>),
    Json(serde_json::Value),
    Map(BTreeMap<String, LeafValue>),
}

impl LeafValue {
    /// Raw store form: what the defaults layer holds for this leaf.
    pub fn to_store(&self) -> Value {
        match self {
            LeafValue::Bool(b) => Value::Boolean(*b),
            LeafValue::Int(i) => Value::Integer(*i),
            LeafValue::Uint(u) => match i64::try_from(*u) {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::String(u.to_string()),
            },
            LeafValue::Float(f) => Value::Float(*f),
            LeafValue::String(s) => Value::String(s.clone()),
            LeafValue::Duration(d) => Value::String(format_duration(*d)),
            LeafValue::Timestamp(t) => Value::String(t.to_rfc3339()),
            LeafValue::Bytes(b) => Value::String(STANDARD.encode(b)),
            LeafValue::List(items) => Value::Array(items.iter().map(LeafValue::to_store).collect()),
            LeafValue::Json(json) => json_to_toml(json.clone()).unwrap_or(Value::Array(Vec::new())),
            LeafValue::Map(entries) => Value::Table(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_store()))
                    .collect::<Table>(),
            ),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            LeafValue::Bool(b) => !b,
            LeafValue::Int(i) => *i == 0,
            LeafValue::Uint(u) => *u == 0,
            LeafValue::Float(f) => *f == 0.0,
            LeafValue::String(s) => s.is_empty(),
            LeafValue::Duration(d) => d.is_zero(),
            LeafValue::Timestamp(t) => t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0,
            LeafValue::Bytes(_) | LeafValue::List(_) | LeafValue::Json(_) | LeafValue::Map(_) => {
                self.len() == Some(0)
            }
        }
    }

    /// Element count for collections, character count for strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            LeafValue::String(s) => Some(s.chars().count()),
            LeafValue::Bytes(b) => Some(b.len()),
            LeafValue::List(items) => Some(items.len()),
            LeafValue::Json(serde_json::Value::Array(items)) => Some(items.len()),
            LeafValue::Json(serde_json::Value::Null) => Some(0),
            LeafValue::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    /// Human-readable rendering, as shown in flag help and used for
    /// string comparisons during validation.
    pub fn display(&self) -> String {
        match self {
            LeafValue::Bool(b) => b.to_string(),
            LeafValue::Int(i) => i.to_string(),
            LeafValue::Uint(u) => u.to_string(),
            LeafValue::Float(f) => f.to_string(),
            LeafValue::String(s) => s.clone(),
            LeafValue::Duration(d) => format_duration(*d),
            LeafValue::Timestamp(t) => t.to_rfc3339(),
            LeafValue::Bytes(b) => STANDARD.encode(b),
            LeafValue::List(items) => {
                let parts: Vec<String> = items.iter().map(LeafValue::display).collect();
                format!("[{}]", parts.join(","))
            }
            LeafValue::Json(json) => json.to_string(),
            LeafValue::Map(entries) => {
                let mut out = String::from("[");
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{k}={}", v.display());
                }
                out.push(']');
                out
            }
        }
    }
}

/// A classified leaf: its kind plus the value it was reflected from.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub kind: Kind,
    pub value: LeafValue,
}

impl Leaf {
    pub fn new(kind: Kind, value: LeafValue) -> Self {
        Self { kind, value }
    }

    /// Default annotation for flag help. Zero values are not annotated.
    pub(crate) fn default_help(&self) -> Option<String> {
        if self.value.is_zero() {
            return None;
        }
        match self.kind {
            Kind::Scalar(Scalar::String) => Some(format!("\"{}\"", self.value.display())),
            _ => Some(self.value.display()),
        }
    }
}

/// Everything derived for a single leaf setting.
///
/// Produced by the schema walk and handed to the field hook, which may rewrite
/// any of it before the flag and environment bindings are registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Dot-joined store key, e.g. `database.max_idle_conns`.
    pub key: String,
    /// Long flag name without dashes, e.g. `database-max-idle-conns`.
    pub flag: String,
    /// Environment variable name, e.g. `APP_DATABASE_MAX_IDLE_CONNS`.
    pub env: String,
    /// Flag help text.
    pub usage: String,
}
