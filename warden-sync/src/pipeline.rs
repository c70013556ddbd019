//! Shared pass entrypoints used by the CLI and the daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use warden_core::{Settings, Store};

use crate::cleaner::{CleanSummary, Cleaner};
use crate::converge::{ConvergeSummary, Converger};
use crate::error::SyncError;
use crate::reconciler::{Reconciler, ScanOutcome};
use crate::scanner::Scanner;
use crate::writer::{ArtifactWriter, FsArtifactWriter};

/// A file whose reconciliation was abandoned for this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// What one scan pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub new: usize,
    pub modified: usize,
    pub retried: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failures: Vec<FileFailure>,
    pub converge: ConvergeSummary,
}

impl ScanSummary {
    fn count(&mut self, outcome: ScanOutcome) {
        match outcome {
            ScanOutcome::New => self.new += 1,
            ScanOutcome::Modified => self.modified += 1,
            ScanOutcome::Retried => self.retried += 1,
            ScanOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Scanner, reconciler, converger, and cleaner over one store.
pub struct Pipeline {
    store: Arc<Store>,
    scanner: Scanner,
    reconciler: Reconciler,
    converger: Converger,
    cleaner: Cleaner,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        writer: Arc<dyn ArtifactWriter>,
        services_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scanner: Scanner::new(services_dir),
            reconciler: Reconciler::new(store.clone()),
            converger: Converger::new(store.clone(), writer.clone()),
            cleaner: Cleaner::new(store.clone(), writer),
            store,
        }
    }

    /// Open the configured store, create its schema, and wire the
    /// filesystem writer. A schema failure is fatal.
    pub fn open(settings: &Settings) -> Result<Self, SyncError> {
        if settings.artifacts_dir.to_str().is_none() {
            return Err(SyncError::NonUtf8ArtifactsDir {
                path: settings.artifacts_dir.clone(),
            });
        }
        let store = Store::open(&settings.database)?;
        store.ensure_schema()?;
        let writer = FsArtifactWriter::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(writer),
            &settings.services_dir,
        ))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn services_dir(&self) -> &Path {
        self.scanner.dir()
    }

    /// Reconcile every definition file, forget vanished ones, then converge.
    pub fn scan_once(&self) -> Result<ScanSummary, SyncError> {
        let snapshot = self.scanner.snapshot(&self.store)?;
        let mut summary = ScanSummary::default();

        for event in &snapshot.events {
            match self.reconciler.reconcile(event) {
                Ok(outcome) => summary.count(outcome),
                Err(e) if is_per_file(&e) => {
                    tracing::warn!(
                        path = %event.path.display(),
                        error = %e,
                        "file reconciliation abandoned",
                    );
                    summary.failures.push(FileFailure {
                        path: event.path.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        for path in &snapshot.rejected {
            summary.failures.push(FileFailure {
                path: path.clone(),
                error: "path is not valid UTF-8".to_string(),
            });
        }

        for path in &snapshot.vanished {
            if self.reconciler.remove(path)?.is_some() {
                summary.removed += 1;
            }
        }

        summary.converge = self.converger.run_pass()?;
        Ok(summary)
    }

    pub fn clean_once(&self) -> Result<CleanSummary, SyncError> {
        self.cleaner.run_pass()
    }
}

/// Errors that abandon one file without aborting the pass.
fn is_per_file(err: &SyncError) -> bool {
    match err {
        SyncError::Decode { .. } | SyncError::Encode { .. } | SyncError::Io { .. } => true,
        SyncError::Store(e) => e.is_constraint(),
        SyncError::Render(_) | SyncError::NonUtf8ArtifactsDir { .. } => false,
    }
}
