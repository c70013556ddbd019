//! Periodic sweep of disowned rows.
//!
//! Pass (a) tears down the artifacts of every orphaned service through the
//! writer and only then deletes the service; its artifact rows are disowned
//! in the same transaction. Pass (b) confirms each disowned artifact is gone
//! from disk and deletes its row. A row is never deleted before the file it
//! points at, because the row is the only record of where that file lives.
//!
//! Both passes only touch rows the reconciler has already disowned, so they
//! may run concurrently with it.

use std::sync::Arc;

use serde::Serialize;

use warden_core::{ArtifactId, ServiceId, Store};

use crate::error::SyncError;
use crate::writer::ArtifactWriter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub services_deleted: usize,
    /// Orphaned services kept because one of their artifacts resisted removal.
    pub services_kept: usize,
    pub artifacts_deleted: usize,
    pub artifacts_kept: usize,
}

pub struct Cleaner {
    store: Arc<Store>,
    writer: Arc<dyn ArtifactWriter>,
}

impl Cleaner {
    pub fn new(store: Arc<Store>, writer: Arc<dyn ArtifactWriter>) -> Self {
        Self { store, writer }
    }

    pub fn run_pass(&self) -> Result<CleanSummary, SyncError> {
        let mut summary = CleanSummary::default();
        self.sweep_services(&mut summary)?;
        self.sweep_artifacts(&mut summary)?;

        if summary != CleanSummary::default() {
            tracing::info!(
                services_deleted = summary.services_deleted,
                services_kept = summary.services_kept,
                artifacts_deleted = summary.artifacts_deleted,
                artifacts_kept = summary.artifacts_kept,
                "cleaner pass finished",
            );
        }
        Ok(summary)
    }

    fn sweep_services(&self, summary: &mut CleanSummary) -> Result<(), SyncError> {
        let mut torn_down: Vec<ServiceId> = Vec::new();
        for service in self.store.orphan_services()? {
            let mut all_removed = true;
            for artifact in self.store.artifacts_of(service.id)? {
                if let Err(e) = self.writer.remove(&artifact) {
                    tracing::warn!(
                        service_id = %service.id,
                        path = %artifact.path.display(),
                        error = %e,
                        "orphan artifact removal failed",
                    );
                    all_removed = false;
                }
            }
            if all_removed {
                torn_down.push(service.id);
            } else {
                summary.services_kept += 1;
            }
        }

        if !torn_down.is_empty() {
            summary.services_deleted = self.store.delete_orphan_services(&torn_down)?;
            tracing::debug!(deleted = summary.services_deleted, "orphan services deleted");
        }
        Ok(())
    }

    fn sweep_artifacts(&self, summary: &mut CleanSummary) -> Result<(), SyncError> {
        let mut gone: Vec<ArtifactId> = Vec::new();
        for artifact in self.store.orphan_artifacts()? {
            match self.writer.remove(&artifact) {
                Ok(()) => gone.push(artifact.id),
                Err(e) => {
                    tracing::warn!(
                        path = %artifact.path.display(),
                        error = %e,
                        "orphan artifact removal failed",
                    );
                    summary.artifacts_kept += 1;
                }
            }
        }

        if !gone.is_empty() {
            summary.artifacts_deleted = self.store.delete_orphan_artifacts(&gone)?;
        }
        Ok(())
    }
}
