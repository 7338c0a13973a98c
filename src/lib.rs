//! Schema-driven configuration binding. Describe a struct once, get a flag,
//! an environment variable and a config-file key for every setting in it.
//!
//! ```ignore
//! let loader = Confx::builder()
//!     .env_prefix("APP_")
//!     .initialize(&AppConfig::default())?;
//! let config: AppConfig = loader.load(None)?;
//! ```
//!
//! `initialize` walks the default value, derives a name for every leaf and
//! registers a typed flag for it. `load` parses the command line once, then
//! layers the sources and hands back a fresh, validated struct.
//!
//! # Describing a struct
//!
//! Rust has no runtime reflection, so a config struct implements
//! [`Describe`], listing its fields with their tags:
//!
//! ```ignore
//! impl Describe for AppConfig {
//!     fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
//!         fields.field("meta", &self.meta).tag("confx", ",squash");
//!         fields.field("port", &self.port).tag("usage", "Listen port");
//!         fields
//!             .field("max_idle_conns", &self.max_idle_conns)
//!             .tag("confx", "maxIdleConns");
//!         fields.field("cache", &self.cache).tag("confx", "-");
//!     }
//! }
//! ```
//!
//! - **`confx`** names the key segment, `-` ignores the field, and `,squash`
//!   flattens a nested struct into its parent's prefix.
//! - **`usage`** is the flag help text (defaults to the key).
//! - **`validate`** holds validation rules, see [`Validator`].
//!
//! The struct also derives `Deserialize`: loaded values are decoded into it
//! by field name.
//!
//! # Names
//!
//! | Key | Flag | Env (prefix `APP_`) |
//! |-----|------|---------------------|
//! | `port` | `--port` | `APP_PORT` |
//! | `database.maxIdleConns` | `--database-max-idle-conns` | `APP_DATABASE_MAX_IDLE_CONNS` |
//! | `extra.float64Slice` | `--extra-float64-slice` | `APP_EXTRA_FLOAT64_SLICE` |
//!
//! A [field hook](ConfxBuilder::field_hook) may rewrite any of these before
//! they are bound. Two settings with the same key (ignoring case) or the same
//! flag are rejected at initialization.
//!
//! # Layer precedence
//!
//! ```text
//! Defaults              the value passed to initialize()
//!        ↑ overridden by
//! Config file           load(Some(path)), or --config/-c
//!        ↑ overridden by
//! Environment vars      APP_DATABASE_HOST
//!        ↑ overridden by
//! Flags                 --database-host, only when passed explicitly
//! ```
//!
//! Config files may be TOML, JSON or YAML; keys match case-insensitively.
//! Every layer is sparse, and a leaf is always replaced whole: a map or list
//! from a higher layer never merges with a lower one.
//!
//! # Coercion
//!
//! Flags and environment variables are strings. Durations read as `1h30m`,
//! timestamps as RFC 3339, byte blobs as base64, slices as `a,b,c`, maps as
//! `k=v,k2=v2`, and slices of structs as a JSON document. See [`coerce`].
//!
//! # Conditional validation
//!
//! The `skip_nested_unless` rule validates a nested struct only when sibling
//! fields hold given values:
//!
//! ```ignore
//! fields.field("kind", &self.kind).tag("validate", "oneof=local remote");
//! fields.field("local", &self.local).tag("validate", "skip_nested_unless=kind local");
//! ```
//!
//! It is registered on every loader's validator. See [`skip_nested`].
//!
//! # Error handling
//!
//! All fallible operations return [`ConfxError`]. Binding failures on the
//! first load are replayed on every later load. Malformed rule tags panic.

pub mod coerce;
pub mod error;
pub mod reflect;
pub mod skip_nested;
pub mod types;
pub mod validate;

mod builder;
mod decode;
mod env;
mod file;
mod flags;
mod loader;
pub(crate) mod merge;
mod naming;
mod schema;

#[cfg(test)]
mod fixtures;

pub use builder::{Confx, ConfxBuilder};
pub use error::{BoxError, ConfxError};
pub use file::{Format, read, read_with_tag_name};
pub use flags::{CONFIG_FLAG, FlagSet};
pub use loader::{Loader, Settings};
pub use naming::{env_name, flag_name};
pub use reflect::{Describe, FieldDef, Fields, Reflect, Reflection};
pub use schema::{DEFAULT_TAG_NAME, DEFAULT_USAGE_TAG_NAME, FieldHook};
pub use skip_nested::SkipNestedUnless;
pub use types::Field;
pub use validate::{FieldLevel, Rule, Validate, ValidationErrors, Validator, rule};
