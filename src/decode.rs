//! Merged store -> destination value.
//!
//! The store is keyed by store keys (tag names, squashed fields flattened into
//! their parent). The destination is deserialized from a table keyed by field
//! names, so each leaf is looked up by its key, coerced, and re-inserted under
//! its field-name path before handing the table to serde.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value as Json};
use toml::{Table, Value};

use crate::coerce::{self, Separators};
use crate::error::ConfxError;
use crate::merge;
use crate::schema::Schema;
use crate::types::Kind;

/// Decode `store` into `T`.
///
/// With `all_groups`, every nested struct gets a table even when none of its
/// leaves has a value, so unset optional groups come back as `Some`.
pub(crate) fn decode<T: DeserializeOwned>(
    schema: &Schema,
    store: &Table,
    seps: &Separators,
    all_groups: bool,
) -> Result<T, ConfxError> {
    let mut dest = Map::new();
    if all_groups {
        for group in &schema.groups {
            ensure_object(&mut dest, group);
        }
    }
    for setting in &schema.settings {
        let Some(raw) = merge::lookup(store, &setting.field.key) else {
            continue;
        };
        let value = coerce::coerce(setting.leaf.kind, raw.clone(), &setting.field.key, seps)?;
        insert(&mut dest, &setting.dest, to_json(setting.leaf.kind, value)).map_err(|reason| {
            ConfxError::Binding {
                key: setting.field.key.clone(),
                reason,
            }
        })?;
    }

    serde_json::from_value(Json::Object(dest)).map_err(|source| ConfxError::Unmarshal {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

/// Coerced store value to the form serde reads. Integers wider than the
/// store's become numbers again.
fn to_json(kind: Kind, value: Value) -> Json {
    match (kind, value) {
        (Kind::Scalar(scalar), Value::String(text)) if scalar.is_integer() => text
            .parse::<u64>()
            .map_or(Json::String(text), Json::from),
        (Kind::Slice(element), Value::Array(items)) => Json::Array(
            items
                .into_iter()
                .map(|item| to_json(Kind::Scalar(element), item))
                .collect(),
        ),
        (_, other) => toml_to_json(other),
    }
}

fn toml_to_json(value: Value) -> Json {
    match value {
        Value::String(s) => Json::String(s),
        Value::Integer(i) => Json::from(i),
        Value::Float(f) => Number::from_f64(f).map_or(Json::Null, Json::Number),
        Value::Boolean(b) => Json::Bool(b),
        Value::Datetime(d) => Json::String(d.to_string()),
        Value::Array(items) => Json::Array(items.into_iter().map(toml_to_json).collect()),
        Value::Table(table) => Json::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn insert(dest: &mut Map<String, Json>, path: &[&'static str], value: Json) -> Result<(), String> {
    let Some((last, parents)) = path.split_last() else {
        return Err("empty key".to_string());
    };
    let mut current = dest;
    for segment in parents {
        current = current
            .entry(*segment)
            .or_insert_with(|| Json::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| format!("\"{segment}\" is not a table"))?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

fn ensure_object(dest: &mut Map<String, Json>, path: &[&'static str]) {
    let mut current = dest;
    for segment in path {
        let entry = current
            .entry(*segment)
            .or_insert_with(|| Json::Object(Map::new()));
        match entry {
            Json::Object(object) => current = object,
            _ => return,
        }
    }
}
