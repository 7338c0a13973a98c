//! Type introspection for configuration structs.
//!
//! Rust has no runtime reflection, so a configuration struct describes itself:
//! [`Describe`] lists its fields in declaration order, each with a name, a
//! reference to the value, and string tags in the spirit of struct tags.
//! Every field type implements [`Reflect`], which classifies the value as a
//! leaf, a nested group, an optional layer, or an unsupported type.
//!
//! ```ignore
//! #[derive(Debug, Default, Deserialize)]
//! struct Database {
//!     host: String,
//!     max_idle_conns: Option<i64>,
//! }
//!
//! impl Describe for Database {
//!     fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
//!         fields
//!             .field("host", &self.host)
//!             .tag("usage", "Database host")
//!             .tag("validate", "required");
//!         fields.field("max_idle_conns", &self.max_idle_conns);
//!     }
//! }
//! ```
//!
//! Field names must match the names serde uses for the struct, since loaded
//! values are re-keyed by them before deserialization. Fields that are never
//! described, or tagged `-`, are not populated and need a serde default.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::types::{Kind, Leaf, LeafValue, MapValue, Scalar};

/// A struct that can enumerate its fields.
pub trait Describe {
    fn describe<'a>(&'a self, fields: &mut Fields<'a>);

    /// Short name used as the root of validation namespaces.
    fn struct_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }
}

/// Collector handed to [`Describe::describe`].
pub struct Fields<'a> {
    defs: Vec<FieldDef<'a>>,
}

impl<'a> Fields<'a> {
    pub fn field(&mut self, name: &'static str, value: &'a dyn Reflect) -> &mut FieldDef<'a> {
        let index = self.defs.len();
        self.defs.push(FieldDef {
            name,
            value,
            tags: Vec::new(),
        });
        &mut self.defs[index]
    }
}

/// One described field and its tags.
pub struct FieldDef<'a> {
    name: &'static str,
    value: &'a dyn Reflect,
    tags: Vec<(&'static str, &'static str)>,
}

impl<'a> FieldDef<'a> {
    /// Attach a tag. A later tag with the same name replaces an earlier one.
    pub fn tag(&mut self, name: &'static str, value: &'static str) -> &mut Self {
        self.tags.retain(|(n, _)| *n != name);
        self.tags.push((name, value));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> &'a dyn Reflect {
        self.value
    }

    /// Tag value, trimmed. `None` when the tag is absent.
    pub fn get_tag(&self, name: &str) -> Option<&'static str> {
        self.tags
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, v)| v.trim())
    }
}

/// Collect the described fields of a value.
pub fn fields_of(value: &dyn Describe) -> Vec<FieldDef<'_>> {
    let mut fields = Fields { defs: Vec::new() };
    value.describe(&mut fields);
    fields.defs
}

/// Look up a field by dotted name, descending into groups and set optionals.
pub fn lookup<'a>(value: &'a dyn Describe, name: &str) -> Option<Reflection<'a>> {
    let (head, rest) = match name.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (name, None),
    };
    let def = fields_of(value).into_iter().find(|f| f.name() == head)?;
    let reflection = def.value().reflect();
    match rest {
        None => Some(reflection),
        Some(rest) => match reflection.resolved() {
            Some(Reflection::Group(group)) => lookup(group, rest),
            _ => None,
        },
    }
}

/// Classification of a single value.
pub enum Reflection<'a> {
    Leaf(Leaf),
    Group(&'a dyn Describe),
    /// An optional layer. `zero` builds the value an unset layer stands for.
    Optional {
        value: Option<&'a dyn Reflect>,
        zero: fn() -> Box<dyn Reflect>,
    },
    Unsupported {
        reason: String,
    },
}

impl<'a> Reflection<'a> {
    /// Strip set optional layers. `None` for an unset one.
    pub fn resolved(self) -> Option<Reflection<'a>> {
        match self {
            Reflection::Optional { value: Some(inner), .. } => inner.reflect().resolved(),
            Reflection::Optional { value: None, .. } => None,
            other => Some(other),
        }
    }
}

/// A type that can be classified for binding.
pub trait Reflect {
    fn reflect(&self) -> Reflection<'_>;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T: Describe> Reflect for T {
    fn reflect(&self) -> Reflection<'_> {
        Reflection::Group(self)
    }
}

fn scalar(kind: Scalar, value: LeafValue) -> Reflection<'static> {
    Reflection::Leaf(Leaf::new(Kind::Scalar(kind), value))
}

macro_rules! reflect_scalar {
    ($($ty:ty => $kind:ident, $variant:ident as $cast:ty;)*) => {
        $(
            impl Reflect for $ty {
                fn reflect(&self) -> Reflection<'_> {
                    scalar(Scalar::$kind, LeafValue::$variant(*self as $cast))
                }
            }
        )*
    };
}

reflect_scalar! {
    i8 => I8, Int as i64;
    i16 => I16, Int as i64;
    i32 => I32, Int as i64;
    i64 => I64, Int as i64;
    isize => Isize, Int as i64;
    u8 => U8, Uint as u64;
    u16 => U16, Uint as u64;
    u32 => U32, Uint as u64;
    u64 => U64, Uint as u64;
    usize => Usize, Uint as u64;
    f64 => F64, Float as f64;
}

impl Reflect for bool {
    fn reflect(&self) -> Reflection<'_> {
        scalar(Scalar::Bool, LeafValue::Bool(*self))
    }
}

impl Reflect for f32 {
    fn reflect(&self) -> Reflection<'_> {
        // Go through the shortest decimal so 1.1f32 reads back as 1.1.
        let widened = self.to_string().parse::<f64>().unwrap_or(f64::from(*self));
        scalar(Scalar::F32, LeafValue::Float(widened))
    }
}

impl Reflect for String {
    fn reflect(&self) -> Reflection<'_> {
        scalar(Scalar::String, LeafValue::String(self.clone()))
    }
}

impl Reflect for Duration {
    fn reflect(&self) -> Reflection<'_> {
        scalar(Scalar::Duration, LeafValue::Duration(*self))
    }
}

impl Reflect for DateTime<Utc> {
    fn reflect(&self) -> Reflection<'_> {
        scalar(Scalar::Timestamp, LeafValue::Timestamp(self.fixed_offset()))
    }
}

impl Reflect for DateTime<FixedOffset> {
    fn reflect(&self) -> Reflection<'_> {
        scalar(Scalar::Timestamp, LeafValue::Timestamp(*self))
    }
}

macro_rules! reflect_unsupported {
    ($($ty:ty),*) => {
        $(
            impl Reflect for $ty {
                fn reflect(&self) -> Reflection<'_> {
                    Reflection::Unsupported {
                        reason: "no flag representation".to_string(),
                    }
                }
            }
        )*
    };
}

reflect_unsupported!(char, i128, u128);

impl<T: Reflect + Default + 'static> Reflect for Option<T> {
    fn reflect(&self) -> Reflection<'_> {
        Reflection::Optional {
            value: self.as_ref().map(|v| v as &dyn Reflect),
            zero: zero_of::<T>,
        }
    }
}

fn zero_of<T: Reflect + Default + 'static>() -> Box<dyn Reflect> {
    Box::new(T::default())
}

/// Typed slice element, or `None` when the element is not a supported scalar.
fn slice_element<T: 'static>() -> Option<Scalar> {
    let id = TypeId::of::<T>();
    [
        (TypeId::of::<bool>(), Scalar::Bool),
        (TypeId::of::<i32>(), Scalar::I32),
        (TypeId::of::<i64>(), Scalar::I64),
        (TypeId::of::<isize>(), Scalar::Isize),
        (TypeId::of::<u32>(), Scalar::U32),
        (TypeId::of::<u64>(), Scalar::U64),
        (TypeId::of::<usize>(), Scalar::Usize),
        (TypeId::of::<f32>(), Scalar::F32),
        (TypeId::of::<f64>(), Scalar::F64),
        (TypeId::of::<String>(), Scalar::String),
        (TypeId::of::<Duration>(), Scalar::Duration),
    ]
    .into_iter()
    .find_map(|(t, s)| (t == id).then_some(s))
}

fn rejected_element<T: 'static>() -> bool {
    let id = TypeId::of::<T>();
    [
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<u16>(),
        TypeId::of::<char>(),
        TypeId::of::<i128>(),
        TypeId::of::<u128>(),
    ]
    .contains(&id)
}

fn element_value(item: &dyn Any) -> Option<LeafValue> {
    macro_rules! try_leaf {
        ($($ty:ty),*) => {
            $(
                if let Some(v) = item.downcast_ref::<$ty>()
                    && let Reflection::Leaf(leaf) = v.reflect()
                {
                    return Some(leaf.value);
                }
            )*
        };
    }
    try_leaf!(bool, i32, i64, isize, u32, u64, usize, f32, f64, String, Duration);
    None
}

impl<T: Serialize + 'static> Reflect for Vec<T> {
    fn reflect(&self) -> Reflection<'_> {
        let any: &dyn Any = self;
        if let Some(bytes) = any.downcast_ref::<Vec<u8>>() {
            return Reflection::Leaf(Leaf::new(Kind::Bytes, LeafValue::Bytes(bytes.clone())));
        }
        if let Some(element) = slice_element::<T>() {
            let items: Option<Vec<LeafValue>> = self
                .iter()
                .map(|item| element_value(item as &dyn Any))
                .collect();
            return match items {
                Some(items) => Reflection::Leaf(Leaf::new(
                    Kind::Slice(element),
                    LeafValue::List(items),
                )),
                None => Reflection::Unsupported {
                    reason: format!(
                        "unsupported slice element type: \"{}\"",
                        std::any::type_name::<T>()
                    ),
                },
            };
        }
        if rejected_element::<T>() {
            return Reflection::Unsupported {
                reason: format!(
                    "unsupported slice element type: \"{}\"",
                    std::any::type_name::<T>()
                ),
            };
        }
        match serde_json::to_value(self) {
            Ok(json) => Reflection::Leaf(Leaf::new(Kind::Json, LeafValue::Json(json))),
            Err(e) => Reflection::Unsupported {
                reason: format!("failed to marshal json: {e}"),
            },
        }
    }
}

fn map_value<V: 'static>() -> Option<MapValue> {
    let id = TypeId::of::<V>();
    if id == TypeId::of::<i32>() {
        Some(MapValue::Int)
    } else if id == TypeId::of::<i64>() {
        Some(MapValue::Int64)
    } else if id == TypeId::of::<String>() {
        Some(MapValue::String)
    } else {
        None
    }
}

fn reflect_map<'m, K, V>(entries: impl Iterator<Item = (&'m K, &'m V)>) -> Reflection<'static>
where
    K: 'static,
    V: 'static,
{
    if TypeId::of::<K>() != TypeId::of::<String>() {
        return Reflection::Unsupported {
            reason: format!(
                "only string keys are supported for map type, but got \"{}\"",
                std::any::type_name::<K>()
            ),
        };
    }
    let Some(value_kind) = map_value::<V>() else {
        return Reflection::Unsupported {
            reason: format!(
                "unsupported map value type \"{}\"",
                std::any::type_name::<V>()
            ),
        };
    };

    let mut values = BTreeMap::new();
    for (k, v) in entries {
        let key = (k as &dyn Any).downcast_ref::<String>();
        let v = v as &dyn Any;
        let value = match value_kind {
            MapValue::Int => v.downcast_ref::<i32>().map(|i| LeafValue::Int(i64::from(*i))),
            MapValue::Int64 => v.downcast_ref::<i64>().map(|i| LeafValue::Int(*i)),
            MapValue::String => v.downcast_ref::<String>().map(|s| LeafValue::String(s.clone())),
        };
        if let (Some(key), Some(value)) = (key, value) {
            values.insert(key.clone(), value);
        }
    }
    Reflection::Leaf(Leaf::new(Kind::Map(value_kind), LeafValue::Map(values)))
}

impl<K: 'static, V: 'static, S: 'static> Reflect for HashMap<K, V, S> {
    fn reflect(&self) -> Reflection<'_> {
        reflect_map(self.iter())
    }
}

impl<K: 'static, V: 'static> Reflect for BTreeMap<K, V> {
    fn reflect(&self) -> Reflection<'_> {
        reflect_map(self.iter())
    }
}

/// `a::b::Config<T>` → `Config`.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
