//! The schema walk: from a default value to one binding per leaf setting.
//!
//! The walk visits described fields depth-first. For every field:
//!
//! - a primary tag of `-` skips the field entirely, whatever its type;
//! - a primary tag containing `,squash` flattens a nested struct into the
//!   parent's key prefix;
//! - otherwise the key segment is the primary tag's name, or the field name;
//! - optional layers are looked through, and unset ones stand in for a fresh
//!   default value, so every leaf has a concrete default;
//! - groups recurse, leaves are classified and get a flag name, an env name
//!   and usage text, then pass through the field hook.
//!
//! The result is a [`Schema`]: the ordered [`Setting`]s plus the key tree the
//! store layers are merged along. Nothing is registered anywhere until the
//! whole walk succeeds.

use std::collections::HashMap;

use toml::Table;
use tracing::debug;

use crate::error::{BoxError, ConfxError};
use crate::merge::{self, KeyTree};
use crate::naming;
use crate::reflect::{Describe, Reflect, Reflection, fields_of};
use crate::types::{Field, Leaf};

/// Default name of the tag holding the key segment, `-` or `,squash`.
pub const DEFAULT_TAG_NAME: &str = "confx";

/// Default name of the tag holding flag usage text.
pub const DEFAULT_USAGE_TAG_NAME: &str = "usage";

/// Rewrites a derived [`Field`] before it is bound. An error aborts initialization.
pub type FieldHook = Box<dyn Fn(Field) -> Result<Field, BoxError> + Send + Sync>;

/// Inputs of a walk.
pub struct WalkOptions<'o> {
    pub tag_name: &'o str,
    pub usage_tag_name: &'o str,
    pub env_prefix: &'o str,
    pub hook: Option<&'o FieldHook>,
    /// Flag names already taken on the flag set.
    pub reserved_flags: &'o [&'o str],
}

impl<'o> WalkOptions<'o> {
    pub fn new(env_prefix: &'o str) -> Self {
        Self {
            tag_name: DEFAULT_TAG_NAME,
            usage_tag_name: DEFAULT_USAGE_TAG_NAME,
            env_prefix,
            hook: None,
            reserved_flags: &["help"],
        }
    }
}

/// A bound leaf.
#[derive(Debug, Clone)]
pub struct Setting {
    pub field: Field,
    /// Field names from the root to this leaf, squashed fields included.
    pub dest: Vec<&'static str>,
    /// Kind and default value.
    pub leaf: Leaf,
}

/// Result of a successful walk.
#[derive(Debug, Default)]
pub struct Schema {
    pub settings: Vec<Setting>,
    /// Field-name paths of every nested struct, outermost first.
    pub groups: Vec<Vec<&'static str>>,
    pub keys: KeyTree,
}

impl Schema {
    /// The defaults layer: every leaf at its default value.
    pub fn defaults(&self) -> Result<Table, ConfxError> {
        let mut table = Table::new();
        for setting in &self.settings {
            merge::insert(&mut table, &setting.field.key, setting.leaf.value.to_store()).map_err(
                |reason| ConfxError::Binding {
                    key: setting.field.key.clone(),
                    reason,
                },
            )?;
        }
        Ok(table)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.settings.iter().map(|s| &s.field)
    }
}

/// Walk `root` and derive every binding.
pub fn walk(root: &dyn Describe, opts: &WalkOptions<'_>) -> Result<Schema, ConfxError> {
    let mut walker = Walker {
        opts,
        schema: Schema::default(),
        flags: HashMap::new(),
    };
    walker.walk_struct(root, &[], &[])?;
    debug!(
        settings = walker.schema.settings.len(),
        root = root.struct_name(),
        "walked config schema"
    );
    Ok(walker.schema)
}

struct Walker<'w, 'o> {
    opts: &'w WalkOptions<'o>,
    schema: Schema,
    /// flag name -> store key
    flags: HashMap<String, String>,
}

impl Walker<'_, '_> {
    fn walk_struct(
        &mut self,
        value: &dyn Describe,
        prefix: &[String],
        dest: &[&'static str],
    ) -> Result<(), ConfxError> {
        for def in fields_of(value) {
            let tag = def.get_tag(self.opts.tag_name).unwrap_or("");
            if tag == "-" {
                continue;
            }
            let (segment, squash) = parse_tag(tag, def.name());

            let mut dest_path = dest.to_vec();
            dest_path.push(def.name());

            if squash {
                self.walk_squash(def.value(), def.name(), prefix, dest_path)?;
                continue;
            }

            let mut key_path = prefix.to_vec();
            key_path.push(segment.to_string());
            let usage = def.get_tag(self.opts.usage_tag_name).filter(|u| !u.is_empty());
            self.walk_field(def.value(), usage, key_path, dest_path)?;
        }
        Ok(())
    }

    fn walk_field(
        &mut self,
        value: &dyn Reflect,
        usage: Option<&str>,
        key_path: Vec<String>,
        dest: Vec<&'static str>,
    ) -> Result<(), ConfxError> {
        match value.reflect() {
            Reflection::Group(group) => {
                self.schema.groups.push(dest.clone());
                self.walk_struct(group, &key_path, &dest)
            }
            Reflection::Optional {
                value: Some(inner), ..
            } => self.walk_field(inner, usage, key_path, dest),
            Reflection::Optional { value: None, zero } => {
                let zero = zero();
                self.walk_field(zero.as_ref(), usage, key_path, dest)
            }
            Reflection::Leaf(leaf) => self.add_leaf(leaf, usage, key_path, dest),
            Reflection::Unsupported { reason } => Err(ConfxError::UnsupportedType {
                key: key_path.join("."),
                type_name: value.type_name().to_string(),
                reason,
            }),
        }
    }

    fn walk_squash(
        &mut self,
        value: &dyn Reflect,
        name: &str,
        prefix: &[String],
        dest: Vec<&'static str>,
    ) -> Result<(), ConfxError> {
        match value.reflect() {
            Reflection::Group(group) => {
                self.schema.groups.push(dest.clone());
                self.walk_struct(group, prefix, &dest)
            }
            Reflection::Optional {
                value: Some(inner), ..
            } => self.walk_squash(inner, name, prefix, dest),
            Reflection::Optional { value: None, zero } => {
                let zero = zero();
                self.walk_squash(zero.as_ref(), name, prefix, dest)
            }
            Reflection::Leaf(_) | Reflection::Unsupported { .. } => {
                Err(ConfxError::UnsupportedSquash {
                    field: name.to_string(),
                    type_name: value.type_name().to_string(),
                })
            }
        }
    }

    fn add_leaf(
        &mut self,
        leaf: Leaf,
        usage: Option<&str>,
        key_path: Vec<String>,
        dest: Vec<&'static str>,
    ) -> Result<(), ConfxError> {
        let key = key_path.join(".");
        let flag = naming::flag_name(&key);
        let env = naming::env_name(self.opts.env_prefix, &flag);
        let usage = usage.map_or_else(|| key.clone(), str::to_string);
        let mut field = Field {
            key,
            flag,
            env,
            usage,
        };

        if let Some(hook) = self.opts.hook {
            let original = field.key.clone();
            field = hook(field).map_err(|source| ConfxError::Hook {
                key: original,
                source,
            })?;
        }

        if field.flag.is_empty() {
            return Err(ConfxError::Binding {
                key: field.key,
                reason: "empty flag name".to_string(),
            });
        }
        if self.opts.reserved_flags.contains(&field.flag.as_str()) {
            return Err(ConfxError::DuplicateFlag {
                flag: field.flag,
                key: field.key,
                existing: "(reserved)".to_string(),
            });
        }
        if let Some(existing) = self.flags.get(&field.flag) {
            return Err(ConfxError::DuplicateFlag {
                flag: field.flag.clone(),
                key: field.key,
                existing: existing.clone(),
            });
        }
        self.schema
            .keys
            .insert(&field.key)
            .map_err(|existing| ConfxError::DuplicateKey {
                key: field.key.clone(),
                existing,
            })?;
        self.flags.insert(field.flag.clone(), field.key.clone());

        debug!(
            key = %field.key,
            flag = %field.flag,
            env = %field.env,
            kind = %leaf.kind.label(),
            "registered setting"
        );
        self.schema.settings.push(Setting { field, dest, leaf });
        Ok(())
    }
}

/// Split a primary tag into its key segment and whether it squashes.
fn parse_tag<'t>(tag: &'t str, field_name: &'static str) -> (&'t str, bool) {
    let (name, options) = tag.split_once(',').unwrap_or((tag, ""));
    let squash = options.split(',').any(|o| o.trim() == "squash");
    let name = name.trim();
    (if name.is_empty() { field_name } else { name }, squash)
}
