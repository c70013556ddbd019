//! Error types for warden-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique or foreign-key violation. Nothing was written.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Schema creation failed; the store is unusable.
    #[error("schema creation failed: {0}")]
    Schema(#[source] rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A stored column could not be parsed back into a domain value.
    #[error("invalid value in column {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store connection lock poisoned")]
    Poisoned,

    /// The path is not valid UTF-8 and would not match itself once stored.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            return StoreError::Constraint(err.to_string());
        }
        StoreError::Sqlite(err)
    }
}

impl StoreError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }
}

/// Malformed service-definition payload.
#[derive(Debug, Error)]
#[error("malformed service definitions: {0}")]
pub struct DecodeError(#[from] pub toml::de::Error);

/// A definition could not be re-encoded into canonical text.
#[derive(Debug, Error)]
#[error("failed to encode service definition: {0}")]
pub struct EncodeError(#[from] pub toml::ser::Error);

/// Unknown enum string read from the store.
#[derive(Debug, Error)]
#[error("unknown {what} '{value}'")]
pub struct StateParseError {
    pub what: &'static str,
    pub value: String,
}

/// Errors from loading or saving `warden.yaml`.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or WARDEN_HOME")]
    HomeNotFound,
}

pub(crate) fn settings_io(path: impl Into<PathBuf>, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.into(),
        source,
    }
}
