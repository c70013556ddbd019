//! Error types for warden-sync.

use std::path::PathBuf;

use thiserror::Error;

use warden_core::{DecodeError, EncodeError, StoreError};
use warden_renderer::RenderError;

/// Errors that abort a reconciliation step or a whole pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The file's payload is malformed; its reconciliation is abandoned until
    /// the next scan.
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("cannot encode service '{service}': {source}")]
    Encode {
        service: String,
        #[source]
        source: EncodeError,
    },

    /// Template setup failed while building the artifact writer.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Artifact paths are recorded as text; a non-UTF-8 artifacts
    /// directory could not be matched back to its files.
    #[error("artifacts directory is not valid UTF-8: {}", .path.display())]
    NonUtf8ArtifactsDir { path: PathBuf },
}

/// Failure to apply or remove one artifact. Never fatal: the caller reports
/// it into the state machine as an unconfirmed transition.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reload command `{command}` failed: {detail}")]
    Reload { command: String, detail: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn apply_io(path: impl Into<PathBuf>, source: std::io::Error) -> ApplyError {
    ApplyError::Io {
        path: path.into(),
        source,
    }
}
