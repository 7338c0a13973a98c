//! Struct validation driven by `validate` tags.
//!
//! The [`Validate`] trait is the seam a loader validates through; [`Validator`]
//! is the bundled engine. A tag holds comma-separated rules, each optionally
//! parameterized with `=`:
//!
//! ```ignore
//! fields.field("log_level", &self.log_level).tag("validate", "oneof=debug info warn");
//! fields.field("port", &self.port).tag("validate", "min=1,max=65535");
//! ```
//!
//! Fields are visited depth-first. Every rule on a field runs and every
//! failure is recorded; the engine descends into a nested struct only when all
//! of the field's own rules passed. Unset optional layers are not descended
//! into, and every rule except `required` passes on them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::coerce::parse_duration;
use crate::error::ConfxError;
use crate::reflect::{Describe, FieldDef, Reflect, Reflection, fields_of, lookup};
use crate::types::LeafValue;

/// Tag holding validation rules.
pub const VALIDATE_TAG: &str = "validate";

/// A validation rule. Returns whether the field passes.
pub type Rule = Arc<dyn Fn(&FieldLevel<'_>) -> bool + Send + Sync>;

static PARAM_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'[^']*'|\S+").expect("param token regex is valid"));

/// Split rule parameters on whitespace; single-quoted runs are one token.
pub(crate) fn split_params(param: &str) -> Vec<String> {
    PARAM_TOKENS
        .find_iter(param)
        .map(|m| m.as_str().replace('\'', ""))
        .collect()
}

/// Wrap a closure as a [`Rule`].
pub fn rule<F>(f: F) -> Rule
where
    F: Fn(&FieldLevel<'_>) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A validation engine.
pub trait Validate: Send + Sync {
    /// Register `rule` under `tag`, replacing any rule already there.
    fn register_rule(&mut self, tag: &str, rule: Rule) -> Result<(), ConfxError>;

    /// Validate a whole struct. Field failures come back as
    /// [`ConfxError::Validation`].
    fn validate(&self, value: &dyn Describe) -> Result<(), ConfxError>;
}

impl<V: Validate + ?Sized> Validate for Box<V> {
    fn register_rule(&mut self, tag: &str, rule: Rule) -> Result<(), ConfxError> {
        (**self).register_rule(tag, rule)
    }

    fn validate(&self, value: &dyn Describe) -> Result<(), ConfxError> {
        (**self).validate(value)
    }
}

/// What a rule sees: the field under test, its parent and the rule parameter.
pub struct FieldLevel<'a> {
    parent: &'a dyn Describe,
    value: &'a dyn Reflect,
    name: &'static str,
    namespace: &'a str,
    param: &'a str,
}

impl<'a> FieldLevel<'a> {
    pub fn field(&self) -> Reflection<'a> {
        self.value.reflect()
    }

    pub fn field_name(&self) -> &'static str {
        self.name
    }

    /// Dotted path from the root struct, e.g. `Config.database.host`.
    pub fn namespace(&self) -> &str {
        self.namespace
    }

    pub fn param(&self) -> &str {
        self.param
    }

    pub fn parent(&self) -> &'a dyn Describe {
        self.parent
    }

    /// A field of the parent by name. Dotted names descend into groups.
    pub fn sibling(&self, name: &str) -> Option<Reflection<'a>> {
        lookup(self.parent, name)
    }
}

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub namespace: String,
    pub field: &'static str,
    pub tag: String,
    pub param: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key: '{}' Error:Field validation for '{}' failed on the '{}' tag",
            self.namespace, self.field, self.tag
        )
    }
}

/// Every failed rule of one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// The bundled engine, with `required`, `omitempty`, `min`, `max`, `gte`,
/// `lte`, `len` and `oneof` registered.
pub struct Validator {
    rules: HashMap<String, Rule>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        let mut rules: HashMap<String, Rule> = HashMap::new();
        rules.insert("required".into(), rule(required));
        rules.insert("min".into(), rule(|fl| compare(fl, |v, p| v >= p)));
        rules.insert("gte".into(), rule(|fl| compare(fl, |v, p| v >= p)));
        rules.insert("max".into(), rule(|fl| compare(fl, |v, p| v <= p)));
        rules.insert("lte".into(), rule(|fl| compare(fl, |v, p| v <= p)));
        rules.insert("len".into(), rule(|fl| compare(fl, |v, p| v == p)));
        rules.insert("oneof".into(), rule(one_of));
        Self { rules }
    }

    fn validate_struct(&self, value: &dyn Describe, namespace: &str, errors: &mut Vec<FieldError>) {
        for def in fields_of(value) {
            let ns = format!("{namespace}.{}", def.name());
            let tag = def.get_tag(VALIDATE_TAG).unwrap_or("");
            if tag == "-" {
                continue;
            }
            if !self.run_rules(value, &def, &ns, tag, errors) {
                continue;
            }
            if let Some(Reflection::Group(group)) = def.value().reflect().resolved() {
                self.validate_struct(group, &ns, errors);
            }
        }
    }

    /// Run every rule in `tag`; `true` when all passed.
    fn run_rules(
        &self,
        parent: &dyn Describe,
        def: &FieldDef<'_>,
        namespace: &str,
        tag: &str,
        errors: &mut Vec<FieldError>,
    ) -> bool {
        let rules: Vec<&str> = tag.split(',').map(str::trim).filter(|r| !r.is_empty()).collect();
        if rules.contains(&"omitempty") && is_empty(def.value().reflect()) {
            return true;
        }
        let mut passed = true;
        for entry in rules {
            if entry == "omitempty" {
                continue;
            }
            let (name, param) = entry.split_once('=').unwrap_or((entry, ""));
            let Some(check) = self.rules.get(name) else {
                panic!("undefined validation rule '{name}' on field '{}'", def.name());
            };
            let level = FieldLevel {
                parent,
                value: def.value(),
                name: def.name(),
                namespace,
                param,
            };
            if !check(&level) {
                errors.push(FieldError {
                    namespace: namespace.to_string(),
                    field: def.name(),
                    tag: name.to_string(),
                    param: param.to_string(),
                });
                passed = false;
            }
        }
        passed
    }
}

impl Validate for Validator {
    fn register_rule(&mut self, tag: &str, rule: Rule) -> Result<(), ConfxError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ConfxError::RuleRegistration {
                tag: tag.to_string(),
                reason: "tag cannot be empty".to_string(),
            });
        }
        if tag == "omitempty" || tag.contains([',', '=']) {
            return Err(ConfxError::RuleRegistration {
                tag: tag.to_string(),
                reason: "tag is reserved or contains a separator".to_string(),
            });
        }
        self.rules.insert(tag.to_string(), rule);
        Ok(())
    }

    fn validate(&self, value: &dyn Describe) -> Result<(), ConfxError> {
        let mut errors = Vec::new();
        self.validate_struct(value, value.struct_name(), &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(errors).into())
        }
    }
}

fn is_empty(field: Reflection<'_>) -> bool {
    match field.resolved() {
        None => true,
        Some(Reflection::Leaf(leaf)) => leaf.value.is_zero(),
        Some(_) => false,
    }
}

fn required(fl: &FieldLevel<'_>) -> bool {
    match fl.field().resolved() {
        None => false,
        Some(Reflection::Leaf(leaf)) => !leaf.value.is_zero(),
        Some(_) => true,
    }
}

/// Numbers compare by value, durations by nanoseconds, strings and
/// collections by length.
fn compare(fl: &FieldLevel<'_>, ok: impl Fn(f64, f64) -> bool) -> bool {
    let Some(field) = fl.field().resolved() else {
        return true;
    };
    let Reflection::Leaf(leaf) = field else {
        return false;
    };
    let param = fl.param().trim();
    let (actual, limit) = match &leaf.value {
        LeafValue::Int(i) => (*i as f64, param.parse::<f64>().ok()),
        LeafValue::Uint(u) => (*u as f64, param.parse::<f64>().ok()),
        LeafValue::Float(f) => (*f, param.parse::<f64>().ok()),
        LeafValue::Duration(d) => (
            d.as_nanos() as f64,
            parse_duration(param)
                .map(|p| p.as_nanos() as f64)
                .ok()
                .or_else(|| param.parse::<f64>().ok()),
        ),
        other => match other.len() {
            Some(len) => (len as f64, param.parse::<f64>().ok()),
            None => return false,
        },
    };
    limit.is_some_and(|limit| ok(actual, limit))
}

fn one_of(fl: &FieldLevel<'_>) -> bool {
    let Some(field) = fl.field().resolved() else {
        return true;
    };
    let Reflection::Leaf(leaf) = field else {
        return false;
    };
    let actual = leaf.value.display();
    split_params(fl.param())
        .iter()
        .any(|allowed| *allowed == actual)
}
