//! The flag registry: a shared `clap::Command` plus its parse result.
//!
//! Every bound setting registers one long flag, typed by its [`Kind`]:
//!
//! - booleans take an optional value: `--verbose`, `--verbose=false`;
//! - scalars, blobs, JSON slices, durations and timestamps take one value,
//!   the last occurrence wins;
//! - slices and maps are repeatable and split on the list separator:
//!   `--tags a,b --tags c`, `--labels env=prod,tier=web`.
//!
//! Values are checked at parse time with the same coercion and separators
//! used at load time, but kept as raw strings; the flag layer only holds
//! values that were passed explicitly on the command line.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use toml::{Table, Value};

use crate::coerce::{self, Separators};
use crate::error::ConfxError;
use crate::merge;
use crate::schema::Setting;
use crate::types::{Kind, Scalar};

/// Id of the reserved config file flag.
pub const CONFIG_FLAG: &str = "config";

/// A flag registry shared between the caller and a loader.
///
/// Cloning is cheap; clones share the same command and parse result.
#[derive(Debug, Clone)]
pub struct FlagSet {
    inner: Arc<Mutex<FlagState>>,
}

#[derive(Debug)]
struct FlagState {
    command: Command,
    matches: Option<ArgMatches>,
}

impl FlagSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_command(Command::new(name.into()))
    }

    /// Register settings on an existing command, e.g. one built with clap's
    /// derive API. Repeated scalar flags keep the last value.
    pub fn from_command(command: Command) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FlagState {
                command: command.args_override_self(true),
                matches: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FlagState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse arguments, not including the program name. A later call replaces
    /// the previous result.
    pub fn parse<I, T>(&self, args: I) -> Result<(), clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut state = self.state();
        let argv: Vec<OsString> = std::iter::once(OsString::from(state.command.get_name()))
            .chain(args.into_iter().map(Into::into))
            .collect();
        let matches = state.command.try_get_matches_from_mut(argv)?;
        state.matches = Some(matches);
        Ok(())
    }

    pub fn is_parsed(&self) -> bool {
        self.state().matches.is_some()
    }

    /// Result of the last successful parse.
    pub fn matches(&self) -> Option<ArgMatches> {
        self.state().matches.clone()
    }

    pub fn has_flag(&self, id: &str) -> bool {
        self.state()
            .command
            .get_arguments()
            .any(|arg| arg.get_id() == id)
    }

    pub fn render_help(&self) -> String {
        self.state().command.render_help().to_string()
    }

    pub(crate) fn register(&self, args: impl IntoIterator<Item = Arg>) {
        let mut state = self.state();
        let command = std::mem::replace(&mut state.command, Command::new(""));
        state.command = command.args(args);
    }

    pub(crate) fn register_config_flag(&self) {
        self.register([Arg::new(CONFIG_FLAG)
            .long(CONFIG_FLAG)
            .short('c')
            .value_name("PATH")
            .value_parser(clap::value_parser!(String))
            .help("Path to configuration file")]);
    }

    /// Value of `--config`, when registered and passed.
    pub(crate) fn config_path(&self) -> Option<PathBuf> {
        let state = self.state();
        let matches = state.matches.as_ref()?;
        matches
            .try_get_one::<String>(CONFIG_FLAG)
            .ok()
            .flatten()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Check every setting's flag is known to the last parse.
    pub(crate) fn check_bound(&self, settings: &[Setting]) -> Result<(), ConfxError> {
        let state = self.state();
        let Some(matches) = state.matches.as_ref() else {
            return Ok(());
        };
        for setting in settings {
            matches
                .try_get_raw(&setting.field.flag)
                .map_err(|e| ConfxError::Binding {
                    key: setting.field.key.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// The flag layer: values passed explicitly on the command line.
    ///
    /// Repeated slice and map flags are joined with the list separator, so
    /// the layer holds one delimited string per setting.
    pub(crate) fn explicit_values(
        &self,
        settings: &[Setting],
        seps: &Separators,
    ) -> Result<Table, ConfxError> {
        let state = self.state();
        let mut table = Table::new();
        let Some(matches) = state.matches.as_ref() else {
            return Ok(table);
        };
        for setting in settings {
            let id = setting.field.flag.as_str();
            let binding_error = |reason: String| ConfxError::Binding {
                key: setting.field.key.clone(),
                reason,
            };
            let values: Vec<String> = matches
                .try_get_many::<String>(id)
                .map_err(|e| binding_error(e.to_string()))?
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            if matches.value_source(id) != Some(ValueSource::CommandLine) {
                continue;
            }
            let value = match setting.leaf.kind {
                Kind::Slice(_) | Kind::Map(_) => Value::String(values.join(&seps.list)),
                _ => match values.into_iter().last() {
                    Some(v) => Value::String(v),
                    None => continue,
                },
            };
            merge::insert(&mut table, &setting.field.key, value).map_err(binding_error)?;
        }
        Ok(table)
    }
}

/// Build the clap argument for a setting.
///
/// Delimited kinds are split by clap only when the list separator is a single
/// character; otherwise each occurrence is kept whole and split at load time.
pub(crate) fn arg_for(setting: &Setting, seps: &Separators) -> Arg {
    let field = &setting.field;
    let kind = setting.leaf.kind;
    let help = match setting.leaf.default_help() {
        Some(default) => format!("{} (default {default})", field.usage),
        None => field.usage.clone(),
    };
    let arg = Arg::new(field.flag.clone())
        .long(field.flag.clone())
        .help(help)
        .value_parser(checker(kind, seps.clone()))
        .allow_negative_numbers(is_numeric(kind));

    match kind {
        Kind::Scalar(Scalar::Bool) => arg
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true")
            .value_name("BOOL"),
        Kind::Slice(_) | Kind::Map(_) => {
            let arg = arg.action(ArgAction::Append).value_name(value_name(kind));
            match single_char(&seps.list) {
                Some(delimiter) => arg.value_delimiter(delimiter),
                None => arg,
            }
        }
        _ => arg.num_args(1).value_name(value_name(kind)),
    }
}

fn is_numeric(kind: Kind) -> bool {
    match kind {
        Kind::Scalar(scalar) | Kind::Slice(scalar) => {
            scalar.is_integer() || matches!(scalar, Scalar::F32 | Scalar::F64)
        }
        Kind::Map(_) | Kind::Bytes | Kind::Json => false,
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn value_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Scalar(Scalar::String) => "STRING",
        Kind::Scalar(Scalar::Duration) => "DURATION",
        Kind::Scalar(Scalar::Timestamp) => "RFC3339",
        Kind::Scalar(Scalar::F32 | Scalar::F64) => "FLOAT",
        Kind::Scalar(_) => "INT",
        Kind::Bytes => "BASE64",
        Kind::Json => "JSON",
        Kind::Slice(_) => "LIST",
        Kind::Map(_) => "KEY=VALUE",
    }
}

/// Parse-time check of a single flag value. Delimited kinds see one element
/// or pair when clap splits them, a whole delimited string otherwise.
fn checker(
    kind: Kind,
    seps: Separators,
) -> impl Fn(&str) -> Result<String, String> + Clone + Send + Sync + 'static {
    move |raw: &str| {
        coerce::coerce(kind, Value::String(raw.to_string()), "flag", &seps)
            .map(|_| raw.to_string())
            .map_err(|e| match e {
                ConfxError::Parse { reason, .. } => reason,
                other => other.to_string(),
            })
    }
}
