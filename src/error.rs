use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::validate::ValidationErrors;

/// Boxed error returned by user-supplied callbacks such as the field hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConfxError {
    #[error("unsupported field type \"{type_name}\" for key \"{key}\": {reason}")]
    UnsupportedType {
        key: String,
        type_name: String,
        reason: String,
    },

    #[error("unsupported squash type: \"{type_name}\" (field '{field}')")]
    UnsupportedSquash { field: String, type_name: String },

    #[error("duplicate config key \"{key}\" (collides with \"{existing}\")")]
    DuplicateKey { key: String, existing: String },

    #[error("duplicate flag \"--{flag}\" (keys \"{existing}\" and \"{key}\")")]
    DuplicateFlag {
        flag: String,
        key: String,
        existing: String,
    },

    #[error("field hook failed for key \"{key}\": {source}")]
    Hook {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to bind \"{key}\": {reason}")]
    Binding { key: String, reason: String },

    #[error("failed to parse flags: {0}")]
    FlagParse(#[from] clap::Error),

    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {reason}")]
    ParseConfig { origin: String, reason: String },

    #[error("invalid value \"{literal}\" for key \"{key}\": {reason}")]
    Parse {
        key: String,
        literal: String,
        reason: String,
    },

    #[error("failed to unmarshal config to {type_name}: {source}")]
    Unmarshal {
        type_name: &'static str,
        source: serde_json::Error,
    },

    #[error("validation failed for config: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("cannot register validation rule \"{tag}\": {reason}")]
    RuleRegistration { tag: String, reason: String },

    /// A failure recorded by the one-shot binding step, replayed on every load.
    #[error("config binding failed: {0}")]
    Init(#[source] Arc<ConfxError>),
}

impl ConfxError {
    pub(crate) fn parse(key: &str, literal: impl Into<String>, reason: impl ToString) -> Self {
        ConfxError::Parse {
            key: key.to_string(),
            literal: literal.into(),
            reason: reason.to_string(),
        }
    }
}
