use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;

use crate::coerce::Separators;
use crate::env::EnvSource;
use crate::error::{BoxError, ConfxError};
use crate::flags::{self, CONFIG_FLAG, FlagSet};
use crate::loader::{Inner, Loader, Settings};
use crate::schema::{self, DEFAULT_TAG_NAME, DEFAULT_USAGE_TAG_NAME, FieldHook, WalkOptions};
use crate::skip_nested::SkipNestedUnless;
use crate::types::Field;
use crate::validate::{Validate, Validator};

/// Entry point for binding a configuration struct.
pub struct Confx;

impl Confx {
    pub fn builder() -> ConfxBuilder {
        ConfxBuilder::new()
    }
}

/// Builder for a [`Loader`].
///
/// Every option has a default: no environment prefix, the `confx` and
/// `usage` tags, a fresh flag set named after the program, the bundled
/// [`Validator`], `,` and `=` separators, and the process environment and
/// arguments.
pub struct ConfxBuilder {
    env_prefix: String,
    tag_name: String,
    usage_tag_name: String,
    flag_set: Option<FlagSet>,
    field_hook: Option<FieldHook>,
    validator: Option<Box<dyn Validate>>,
    separators: Separators,
    env: EnvSource,
    args: Option<Vec<OsString>>,
}

impl ConfxBuilder {
    fn new() -> Self {
        Self {
            env_prefix: String::new(),
            tag_name: DEFAULT_TAG_NAME.to_string(),
            usage_tag_name: DEFAULT_USAGE_TAG_NAME.to_string(),
            flag_set: None,
            field_hook: None,
            validator: None,
            separators: Separators::default(),
            env: EnvSource::Process,
            args: None,
        }
    }

    /// Prefix of every environment variable name, e.g. `APP_`.
    ///
    /// # Panics
    ///
    /// If `prefix` is empty.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        assert!(!prefix.is_empty(), "confx: env prefix cannot be empty");
        self.env_prefix = prefix.to_string();
        self
    }

    /// Name of the tag holding key segments, `-` and `,squash` (default `confx`).
    ///
    /// # Panics
    ///
    /// If `name` is empty.
    pub fn tag_name(mut self, name: &str) -> Self {
        assert!(!name.is_empty(), "confx: tag name cannot be empty");
        self.tag_name = name.to_string();
        self
    }

    /// Name of the tag holding flag help text (default `usage`).
    ///
    /// # Panics
    ///
    /// If `name` is empty.
    pub fn usage_tag_name(mut self, name: &str) -> Self {
        assert!(!name.is_empty(), "confx: usage tag name cannot be empty");
        self.usage_tag_name = name.to_string();
        self
    }

    /// Register flags on a caller-owned flag set instead of a fresh one.
    ///
    /// The caller may parse it before the first load; otherwise the first load
    /// parses the process arguments with it. No `--config` flag is added.
    pub fn flag_set(mut self, flags: FlagSet) -> Self {
        self.flag_set = Some(flags);
        self
    }

    /// Rewrite each derived [`Field`] before it is bound.
    pub fn field_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Field) -> Result<Field, BoxError> + Send + Sync + 'static,
    {
        self.field_hook = Some(Box::new(hook));
        self
    }

    /// Validate loaded values with `validator` instead of the bundled one.
    /// `skip_nested_unless` is registered on it either way.
    pub fn validator(mut self, validator: impl Validate + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Separators for delimited slice and map strings.
    pub fn separators(mut self, list: &str, key_value: &str) -> Self {
        self.separators = Separators {
            list: list.to_string(),
            key_value: key_value.to_string(),
        };
        self
    }

    /// Read environment variables from a fixed snapshot instead of the process.
    pub fn env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env = EnvSource::Fixed(vars);
        self
    }

    /// Arguments (without the program name) for the first load to parse,
    /// instead of the process arguments. Ignored once the flag set is parsed.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Walk `default` and register a flag per setting.
    ///
    /// Nothing is registered unless the whole walk succeeds. Binding is
    /// deferred to the first [`Loader::load`].
    pub fn initialize<T: Settings>(self, default: &T) -> Result<Loader<T>, ConfxError> {
        let owns_flags = self.flag_set.is_none();
        let flags = self.flag_set.unwrap_or_else(|| FlagSet::new(program_name()));
        let reserved: &[&str] = if owns_flags {
            &["help", CONFIG_FLAG]
        } else {
            &["help"]
        };

        let opts = WalkOptions {
            tag_name: &self.tag_name,
            usage_tag_name: &self.usage_tag_name,
            env_prefix: &self.env_prefix,
            hook: self.field_hook.as_ref(),
            reserved_flags: reserved,
        };
        let schema = schema::walk(default, &opts)?;
        if !owns_flags
            && let Some(taken) = schema.settings.iter().find(|s| flags.has_flag(&s.field.flag))
        {
            return Err(ConfxError::DuplicateFlag {
                flag: taken.field.flag.clone(),
                key: taken.field.key.clone(),
                existing: "(flag set)".to_string(),
            });
        }
        let defaults = schema.defaults()?;

        let validator: Box<dyn Validate> = Box::new(SkipNestedUnless::new(
            self.validator
                .unwrap_or_else(|| Box::new(Validator::new()) as Box<dyn Validate>),
        )?);

        if owns_flags {
            flags.register_config_flag();
        }
        flags.register(
            schema
                .settings
                .iter()
                .map(|setting| flags::arg_for(setting, &self.separators)),
        );
        debug!(
            settings = schema.settings.len(),
            owns_flags,
            env_prefix = %self.env_prefix,
            "initialized config loader"
        );

        Ok(Loader::new(Inner {
            schema,
            defaults,
            flags,
            owns_flags,
            env: self.env,
            args: self.args,
            separators: self.separators,
            validator,
            bound: OnceLock::new(),
        }))
    }
}

fn program_name() -> String {
    std::env::args_os()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "app".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::{Database, TestConfig, vars};
    use crate::reflect::{Describe, Fields};
    use crate::validate::rule;

    #[test]
    fn defaults() {
        let builder = Confx::builder();
        assert_eq!(builder.env_prefix, "");
        assert_eq!(builder.tag_name, "confx");
        assert_eq!(builder.usage_tag_name, "usage");
        assert_eq!(builder.separators, Separators::default());
        assert!(builder.flag_set.is_none());
    }

    #[test]
    #[should_panic(expected = "env prefix cannot be empty")]
    fn empty_env_prefix_panics() {
        let _ = Confx::builder().env_prefix("");
    }

    #[test]
    #[should_panic(expected = "tag name cannot be empty")]
    fn empty_tag_name_panics() {
        let _ = Confx::builder().tag_name("");
    }

    #[test]
    fn owned_flag_set_gets_config_flag() {
        let loader = Confx::builder()
            .env_vars(vars(&[]))
            .args(Vec::<String>::new())
            .initialize(&TestConfig::default())
            .unwrap();
        assert!(loader.flag_set().has_flag(CONFIG_FLAG));
        assert!(loader.flag_set().has_flag("database-host"));
    }

    #[test]
    fn hook_error_registers_nothing() {
        let flags = FlagSet::new("svc");
        let err = Confx::builder()
            .flag_set(flags.clone())
            .field_hook(|f: Field| {
                if f.key == "extra.labels" {
                    Err("labels are not allowed".into())
                } else {
                    Ok(f)
                }
            })
            .initialize(&TestConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfxError::Hook { .. }));
        assert!(!flags.has_flag("port"));
    }

    #[test]
    fn hook_can_rename_env_and_key() {
        let loader = Confx::builder()
            .env_prefix("APP_")
            .env_vars(vars(&[("DB_HOST", "db.env")]))
            .args(Vec::<String>::new())
            .field_hook(|mut f: Field| {
                if f.key == "database.host" {
                    f.env = "DB_HOST".to_string();
                }
                Ok(f)
            })
            .initialize(&TestConfig::default())
            .unwrap();
        assert_eq!(loader.load(None).unwrap().database.host, "db.env");
    }

    #[test]
    fn flag_already_on_caller_set_is_rejected() {
        let flags = FlagSet::from_command(
            clap::Command::new("svc").arg(clap::Arg::new("port").long("port")),
        );
        let err = Confx::builder()
            .flag_set(flags)
            .initialize(&TestConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfxError::DuplicateFlag { ref flag, .. } if flag == "port"));
    }

    #[test]
    fn config_field_collides_only_with_owned_flags() {
        #[derive(Default, serde::Deserialize)]
        struct WithConfig {
            config: String,
        }
        impl Describe for WithConfig {
            fn describe<'a>(&'a self, fields: &mut Fields<'a>) {
                fields.field("config", &self.config);
            }
        }
        let owned = Confx::builder().initialize(&WithConfig::default());
        assert!(matches!(owned.err(), Some(ConfxError::DuplicateFlag { .. })));

        let caller = Confx::builder()
            .flag_set(FlagSet::new("svc"))
            .initialize(&WithConfig::default());
        assert!(caller.is_ok());
    }

    #[test]
    fn custom_tag_and_usage_names() {
        let loader = Confx::builder()
            .tag_name("confz")
            .usage_tag_name("help")
            .env_vars(vars(&[]))
            .args(["--address", "db.flag"])
            .initialize(&Database::default())
            .unwrap();
        assert_eq!(loader.load(None).unwrap().host, "db.flag");
        assert!(loader.flag_set().render_help().contains("--address"));
    }

    #[test]
    fn custom_separators() {
        let loader = Confx::builder()
            .env_prefix("APP_")
            .separators(";", ":")
            .env_vars(vars(&[("APP_EXTRA_LABELS", "env:prod;tier:web")]))
            .args(Vec::<String>::new())
            .initialize(&TestConfig::default())
            .unwrap();
        let config = loader.load(None).unwrap();
        assert_eq!(config.extra.labels["tier"], "web");
    }

    #[test]
    fn custom_validator_keeps_skip_rule() {
        let mut validator = Validator::new();
        validator
            .register_rule("never", rule(|_| false))
            .unwrap();
        let loader = Confx::builder()
            .validator(validator)
            .env_vars(vars(&[]))
            .args(Vec::<String>::new())
            .initialize(&TestConfig::default())
            .unwrap();
        assert!(loader.load(None).is_ok());
    }
}
