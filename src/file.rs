//! Config files and the one-shot reader.
//!
//! Files are parsed into a `toml::Table` whatever their format, so they layer
//! like any other source. The format follows the file extension: `.toml`,
//! `.json`, `.yaml` or `.yml`. JSON and YAML nulls count as unset.

use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use toml::{Table, Value};
use tracing::debug;

use crate::coerce::{Separators, json_to_toml};
use crate::decode;
use crate::error::ConfxError;
use crate::reflect::Describe;
use crate::schema::{self, WalkOptions};

/// Config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
    Yaml,
}

impl Format {
    /// Format from an identifier such as `yaml`, `.yml` or `toml`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "toml" => Some(Format::Toml),
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::from_name)
    }

    /// Parse a document into a table. `origin` names the source in errors.
    pub fn parse(self, content: &str, origin: &str) -> Result<Table, ConfxError> {
        let parse_error = |reason: String| ConfxError::ParseConfig {
            origin: origin.to_string(),
            reason,
        };
        let json = match self {
            Format::Toml => return toml::from_str(content).map_err(|e| parse_error(e.to_string())),
            Format::Json => serde_json::from_str::<serde_json::Value>(content)
                .map_err(|e| parse_error(e.to_string()))?,
            Format::Yaml => {
                if content.trim().is_empty() {
                    return Ok(Table::new());
                }
                serde_yaml::from_str::<serde_json::Value>(content)
                    .map_err(|e| parse_error(e.to_string()))?
            }
        };
        match json_to_toml(json) {
            Some(Value::Table(table)) => Ok(table),
            None => Ok(Table::new()),
            Some(_) => Err(parse_error("top level must be a mapping".to_string())),
        }
    }
}

/// Read and parse a config file.
pub fn load_file(path: &Path) -> Result<Table, ConfxError> {
    let format = Format::from_path(path).ok_or_else(|| ConfxError::ParseConfig {
        origin: path.display().to_string(),
        reason: "unsupported config file extension (expected toml, json, yaml or yml)".to_string(),
    })?;
    let content = std::fs::read_to_string(path).map_err(|e| ConfxError::ReadConfig {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!(path = %path.display(), ?format, "read config file");
    format.parse(&content, &path.display().to_string())
}

/// Decode a document straight into `T`, with the default tag name.
///
/// Tag conventions and coercion apply as in a loader, but there are no flags,
/// no environment and no defaults layer: keys missing from the document are
/// left to `T`'s serde defaults. Used for embedded defaults.
pub fn read<T>(format: &str, reader: impl Read) -> Result<T, ConfxError>
where
    T: Describe + DeserializeOwned + Default,
{
    read_with_tag_name(schema::DEFAULT_TAG_NAME, format, reader)
}

/// [`read`] with a custom primary tag name.
pub fn read_with_tag_name<T>(tag_name: &str, format: &str, mut reader: impl Read) -> Result<T, ConfxError>
where
    T: Describe + DeserializeOwned + Default,
{
    let origin = format!("{format} document");
    let format = Format::from_name(format).ok_or_else(|| ConfxError::ParseConfig {
        origin: origin.clone(),
        reason: "unsupported config type".to_string(),
    })?;
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|e| ConfxError::ParseConfig {
            origin: origin.clone(),
            reason: e.to_string(),
        })?;

    let mut opts = WalkOptions::new("");
    opts.tag_name = tag_name;
    let schema = schema::walk(&T::default(), &opts)?;
    let table = schema.keys.canonicalize(format.parse(&content, &origin)?);
    decode::decode(&schema, &table, &Separators::default(), false)
}
