//! Artifact writer: renders listener fragments onto disk and reloads the proxy.
//!
//! ## `atomic_write`: hash-gated protocol
//!
//! 1. Normalise line endings to LF.
//! 2. SHA-256 hash the normalised content.
//! 3. Hash the file currently at the target path, if any.
//! 4. Skip if both digests match.
//! 5. Write to `<path>.warden.tmp`.
//! 6. Rename to final path (atomic on POSIX).

use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};

use warden_core::{ArtifactKind, ConfigArtifact, Service, ServiceDefinition, Settings};
use warden_renderer::{ListenerContext, RenderError, RenderOptions, Renderer};

use crate::error::{apply_io, ApplyError};

// ---------------------------------------------------------------------------
// ArtifactWriter
// ---------------------------------------------------------------------------

/// One listener fragment to materialise for a live service.
#[derive(Debug, Clone, Copy)]
pub struct Listener<'a> {
    /// Display name of the owning file.
    pub file_name: &'a str,
    pub service: &'a Service,
    pub definition: &'a ServiceDefinition,
    pub kind: ArtifactKind,
}

/// Renders, writes, and removes proxy configuration fragments.
///
/// Every successful `apply` or `remove` has also reloaded the proxy.
pub trait ArtifactWriter: Send + Sync {
    /// Where the fragment for `listener` lives. Must be stable for a given
    /// service row and kind, and distinct across rows.
    fn artifact_path(&self, listener: &Listener<'_>) -> PathBuf;

    fn apply(&self, listener: &Listener<'_>) -> Result<PathBuf, ApplyError>;

    /// Remove the fragment. An already-absent file counts as removed.
    fn remove(&self, artifact: &ConfigArtifact) -> Result<(), ApplyError>;
}

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File already holds the rendered content.
    Unchanged { path: PathBuf },
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

fn digest(content: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(content);
    hex::encode(h.finalize())
}

pub(crate) fn atomic_write(path: &Path, content: &str) -> Result<WriteResult, ApplyError> {
    let tmp = PathBuf::from(format!("{}.warden.tmp", path.display()));
    atomic_write_with_tmp(path, content, &tmp)
}

fn atomic_write_with_tmp(path: &Path, content: &str, tmp: &Path) -> Result<WriteResult, ApplyError> {
    let normalized = content.replace("\r\n", "\n");
    let content = normalized.as_str();

    match std::fs::read(path) {
        Ok(existing) if digest(&existing) == digest(content.as_bytes()) => {
            tracing::debug!(path = %path.display(), "artifact unchanged");
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(apply_io(path, e)),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| apply_io(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| apply_io(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| apply_io(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(apply_io(path, e));
    }

    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// FsArtifactWriter
// ---------------------------------------------------------------------------

/// Writes fragments under one directory and runs an optional reload command.
pub struct FsArtifactWriter {
    artifacts_dir: PathBuf,
    renderer: Renderer,
    options: RenderOptions,
    reload_command: Option<Vec<String>>,
}

impl FsArtifactWriter {
    pub fn new(
        artifacts_dir: impl Into<PathBuf>,
        renderer: Renderer,
        options: RenderOptions,
        reload_command: Option<Vec<String>>,
    ) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            renderer,
            options,
            reload_command: reload_command.filter(|cmd| !cmd.is_empty()),
        }
    }

    /// Writer configured from `warden.yaml`, with template overrides loaded
    /// from `settings.templates_dir` when it exists.
    pub fn from_settings(settings: &Settings) -> Result<Self, RenderError> {
        let renderer = Renderer::with_overrides(Some(&settings.templates_dir))?;
        let options = RenderOptions {
            acme_root: settings.acme_root.clone(),
            certificate_dir: settings.certificate_dir.clone(),
        };
        Ok(Self::new(
            &settings.artifacts_dir,
            renderer,
            options,
            settings.reload_command.clone(),
        ))
    }

    fn reload(&self) -> Result<(), ApplyError> {
        let Some(cmd) = self.reload_command.as_deref() else {
            return Ok(());
        };
        let Some((program, args)) = cmd.split_first() else {
            return Ok(());
        };
        let command = cmd.join(" ");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ApplyError::Reload {
                command: command.clone(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ApplyError::Reload {
                command,
                detail: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }
        tracing::debug!(command = %command, "proxy reloaded");
        Ok(())
    }
}

/// Keeps generated file names to a portable character set.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ArtifactWriter for FsArtifactWriter {
    /// `<artifacts_dir>/<file>.<service>.<service id>.<kind>.conf`
    fn artifact_path(&self, listener: &Listener<'_>) -> PathBuf {
        self.artifacts_dir.join(format!(
            "{}.{}.{}.{}.conf",
            sanitize(listener.file_name),
            sanitize(&listener.service.name),
            listener.service.id,
            listener.kind,
        ))
    }

    fn apply(&self, listener: &Listener<'_>) -> Result<PathBuf, ApplyError> {
        let path = self.artifact_path(listener);
        let ctx = ListenerContext::new(
            listener.service,
            Some(listener.file_name),
            listener.definition,
            &self.options,
        );
        let rendered = self.renderer.render(&ctx, listener.kind)?;

        match atomic_write(&path, &rendered)? {
            WriteResult::Written { path } => {
                tracing::info!(
                    path = %path.display(),
                    service_id = %listener.service.id,
                    kind = %listener.kind,
                    "artifact written",
                );
            }
            WriteResult::Unchanged { .. } => {}
        }
        // Reload even when unchanged: an earlier reload may have failed.
        self.reload()?;
        Ok(path)
    }

    fn remove(&self, artifact: &ConfigArtifact) -> Result<(), ApplyError> {
        match std::fs::remove_file(&artifact.path) {
            Ok(()) => {
                tracing::info!(
                    path = %artifact.path.display(),
                    kind = %artifact.kind,
                    "artifact removed",
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(apply_io(&artifact.path, e)),
        }
        self.reload()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
