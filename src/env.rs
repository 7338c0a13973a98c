//! The environment layer.
//!
//! Every bound setting has an exact environment variable name (see
//! [`naming::env_name`](crate::naming::env_name)); only those names are read.
//! Values are kept as raw strings and coerced with the rest of the store.
//! Empty values count as unset.

use std::collections::HashMap;

use toml::{Table, Value};

use crate::error::ConfxError;
use crate::merge;
use crate::schema::Setting;

/// Where environment variables come from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The process environment, read on every load.
    #[default]
    Process,
    /// A fixed snapshot.
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    pub(crate) fn vars(&self) -> HashMap<String, String> {
        match self {
            EnvSource::Process => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
            EnvSource::Fixed(vars) => vars.clone(),
        }
    }
}

/// Build the environment layer for the bound settings.
///
/// Takes the variables as a map so tests can pass synthetic data instead of
/// the process environment.
pub fn env_to_table(settings: &[Setting], vars: &HashMap<String, String>) -> Result<Table, ConfxError> {
    let mut table = Table::new();
    for setting in settings {
        let Some(value) = vars.get(&setting.field.env) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        merge::insert(&mut table, &setting.field.key, Value::String(value.clone())).map_err(
            |reason| ConfxError::Binding {
                key: setting.field.key.clone(),
                reason,
            },
        )?;
    }
    Ok(table)
}
