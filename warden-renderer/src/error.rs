//! Error types for warden-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while building the template set or rendering one listener.
#[derive(Debug, Error)]
pub enum RenderError {
    /// An override template could not be read from the templates directory.
    #[error("cannot read override template {path}: {source}")]
    Override {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedded templates plus overrides do not parse as one set,
    /// typically a syntax error or a missing include in an override.
    #[error("invalid listener templates (overrides: {}): {source}", overrides_label(.overrides))]
    Templates {
        overrides: Option<PathBuf>,
        #[source]
        source: tera::Error,
    },

    /// A listener context could not be turned into template variables.
    #[error("cannot build template context for service '{service}': {source}")]
    Context {
        service: String,
        #[source]
        source: tera::Error,
    },

    /// Rendering a parsed template failed, e.g. an override referencing an
    /// unknown variable.
    #[error("cannot render {template} for service '{service}': {source}")]
    Render {
        template: &'static str,
        service: String,
        #[source]
        source: tera::Error,
    },
}

fn overrides_label(dir: &Option<PathBuf>) -> String {
    dir.as_ref()
        .map_or_else(|| "none".to_string(), |d| d.display().to_string())
}
