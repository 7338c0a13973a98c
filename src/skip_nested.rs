//! The `skip_nested_unless` rule: validate a nested struct only when sibling
//! fields hold given values.
//!
//! ```ignore
//! fields.field("kind", &self.kind).tag("validate", "oneof=local remote");
//! fields
//!     .field("local", &self.local)
//!     .tag("validate", "skip_nested_unless=kind local");
//! ```
//!
//! Parameters are `<field> <value>` pairs, all of which must match. Values
//! may be single-quoted to hold spaces. When a pair does not match, the rule
//! fails and the engine does not descend into the field; [`filter_skipped`]
//! then drops those synthetic failures from the result.

use crate::coerce::parse_duration;
use crate::error::ConfxError;
use crate::reflect::{Describe, Reflection};
use crate::types::{Kind, Leaf, LeafValue, Scalar};
use crate::validate::{FieldLevel, Rule, Validate, ValidationErrors, rule, split_params};

/// Tag name of the rule.
pub const SKIP_NESTED_UNLESS: &str = "skip_nested_unless";

/// A validator with `skip_nested_unless` registered, whose results have the
/// rule's own failures removed.
pub struct SkipNestedUnless<V> {
    inner: V,
}

impl<V: Validate> SkipNestedUnless<V> {
    pub fn new(mut inner: V) -> Result<Self, ConfxError> {
        inner.register_rule(SKIP_NESTED_UNLESS, skip_nested_unless_rule())?;
        Ok(Self { inner })
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: Validate> Validate for SkipNestedUnless<V> {
    fn register_rule(&mut self, tag: &str, rule: Rule) -> Result<(), ConfxError> {
        self.inner.register_rule(tag, rule)
    }

    fn validate(&self, value: &dyn Describe) -> Result<(), ConfxError> {
        filter_skipped(self.inner.validate(value))
    }
}

/// The rule, for engines wired up by hand.
pub fn skip_nested_unless_rule() -> Rule {
    rule(skip_nested_unless)
}

/// Drop `skip_nested_unless` failures from a validation result.
///
/// Only [`ConfxError::Validation`] is filtered; any other error passes
/// through unchanged.
pub fn filter_skipped(result: Result<(), ConfxError>) -> Result<(), ConfxError> {
    match result {
        Err(ConfxError::Validation(ValidationErrors(errors))) => {
            let remaining: Vec<_> = errors
                .into_iter()
                .filter(|e| e.tag != SKIP_NESTED_UNLESS)
                .collect();
            if remaining.is_empty() {
                Ok(())
            } else {
                Err(ValidationErrors(remaining).into())
            }
        }
        other => other,
    }
}

/// # Panics
///
/// On an odd number of parameters: the tag itself is malformed.
fn skip_nested_unless(fl: &FieldLevel<'_>) -> bool {
    let params = split_params(fl.param());
    if params.len() % 2 != 0 {
        panic!(
            "bad parameter count for {SKIP_NESTED_UNLESS} on field '{}': expected field/value pairs, got {:?}",
            fl.field_name(),
            params
        );
    }
    params
        .chunks_exact(2)
        .all(|pair| fl.sibling(&pair[0]).is_some_and(|field| value_matches(field, &pair[1])))
}

fn value_matches(field: Reflection<'_>, expected: &str) -> bool {
    match field {
        Reflection::Optional { value: None, .. } => expected == "nil",
        Reflection::Optional {
            value: Some(inner), ..
        } => value_matches(inner.reflect(), expected),
        Reflection::Leaf(leaf) => leaf_matches(&leaf, expected),
        Reflection::Group(_) | Reflection::Unsupported { .. } => false,
    }
}

fn leaf_matches(leaf: &Leaf, expected: &str) -> bool {
    match &leaf.value {
        LeafValue::Int(i) => expected.parse::<i64>().is_ok_and(|e| e == *i),
        LeafValue::Uint(u) => expected.parse::<u64>().is_ok_and(|e| e == *u),
        LeafValue::Float(f) if leaf.kind == Kind::Scalar(Scalar::F32) => expected
            .parse::<f32>()
            .is_ok_and(|e| e == *f as f32),
        LeafValue::Float(f) => expected.parse::<f64>().is_ok_and(|e| e == *f),
        LeafValue::Bool(b) => *b == (expected == "true"),
        LeafValue::Duration(d) => match parse_duration(expected) {
            Ok(e) => e == *d,
            Err(_) => expected.parse::<u128>().is_ok_and(|n| n == d.as_nanos()),
        },
        LeafValue::String(s) => s == expected,
        other => match other.len() {
            Some(len) if !matches!(other, LeafValue::Json(serde_json::Value::Null)) => {
                expected.parse::<usize>().is_ok_and(|e| e == len)
            }
            _ => other.display() == expected,
        },
    }
}
