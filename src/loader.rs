use std::ffi::OsString;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use clap::error::ErrorKind;
use serde::de::DeserializeOwned;
use toml::Table;
use tracing::{debug, warn};

use crate::coerce::Separators;
use crate::decode;
use crate::env::{self, EnvSource};
use crate::error::ConfxError;
use crate::file;
use crate::flags::FlagSet;
use crate::reflect::Describe;
use crate::schema::Schema;
use crate::types::Field;
use crate::validate::Validate;

/// What a loader can produce: a self-describing struct serde can build.
pub trait Settings: Describe + DeserializeOwned + Send + Sync + 'static {}

impl<T> Settings for T where T: Describe + DeserializeOwned + Send + Sync + 'static {}

/// A bound configuration, returned by
/// [`ConfxBuilder::initialize`](crate::ConfxBuilder::initialize).
///
/// Cloning is cheap; clones share the flag set and the one-shot binding gate.
pub struct Loader<T> {
    inner: Arc<Inner>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _phantom: PhantomData,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) schema: Schema,
    pub(crate) defaults: Table,
    pub(crate) flags: FlagSet,
    pub(crate) owns_flags: bool,
    pub(crate) env: EnvSource,
    pub(crate) args: Option<Vec<OsString>>,
    pub(crate) separators: Separators,
    pub(crate) validator: Box<dyn Validate>,
    pub(crate) bound: OnceLock<Result<(), Arc<ConfxError>>>,
}

impl<T: Settings> Loader<T> {
    pub(crate) fn new(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
            _phantom: PhantomData,
        }
    }

    /// Load the configuration.
    ///
    /// The first call parses process arguments unless the flag set was already
    /// parsed, then checks every setting is bound. That step runs once; its
    /// failure is returned, wrapped in [`ConfxError::Init`], by every call.
    ///
    /// Layers, lowest to highest precedence:
    ///
    /// 1. defaults, from the value passed to `initialize`
    /// 2. the config file: `path`, else `--config` when the loader owns the flags
    /// 3. environment variables
    /// 4. flags passed on the command line
    ///
    /// The merged result is coerced, decoded into a fresh `T` and validated.
    ///
    /// # Exits
    ///
    /// When the first parse hits `--help` or `--version`, the message is
    /// printed and the process exits.
    pub fn load(&self, path: Option<&Path>) -> Result<T, ConfxError> {
        let inner = &*self.inner;
        inner.bind()?;

        let keys = &inner.schema.keys;
        let mut merged = inner.defaults.clone();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| if inner.owns_flags { inner.flags.config_path() } else { None });
        if let Some(path) = &path {
            merged = keys.merge(merged, keys.canonicalize(file::load_file(path)?));
            debug!(path = %path.display(), "merged config file");
        }

        let env_table = env::env_to_table(&inner.schema.settings, &inner.env.vars())?;
        merged = keys.merge(merged, env_table);

        let flag_table = inner
            .flags
            .explicit_values(&inner.schema.settings, &inner.separators)?;
        merged = keys.merge(merged, flag_table);

        let config: T = decode::decode(&inner.schema, &merged, &inner.separators, true)?;
        if let Err(err) = inner.validator.validate(&config) {
            warn!(error = %err, "config validation failed");
            return Err(err);
        }
        Ok(config)
    }

    /// Every bound setting, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.inner.schema.fields()
    }

    /// The flag set settings are registered on.
    pub fn flag_set(&self) -> &FlagSet {
        &self.inner.flags
    }
}

impl Inner {
    fn bind(&self) -> Result<(), ConfxError> {
        self.bound
            .get_or_init(|| self.bind_once().map_err(Arc::new))
            .clone()
            .map_err(ConfxError::Init)
    }

    fn bind_once(&self) -> Result<(), ConfxError> {
        if !self.flags.is_parsed() {
            let args = self
                .args
                .clone()
                .unwrap_or_else(|| std::env::args_os().skip(1).collect());
            if let Err(err) = self.flags.parse(args) {
                if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                    err.exit();
                }
                return Err(err.into());
            }
        }
        self.flags.check_bound(&self.schema.settings)?;
        debug!(settings = self.schema.settings.len(), "bound flags and environment");
        Ok(())
    }
}
