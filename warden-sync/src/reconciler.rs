//! Scan-event reconciliation against the store.
//!
//! For every scanned file the reconciler decides whether anything changed,
//! updates the file row, and re-derives its service rows. A fresh decode
//! never edits existing service rows: it inserts a new batch and only then
//! disowns the previous one, so a crash in between leaves duplicates for the
//! cleaner rather than a file with no services.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use warden_core::{
    codec,
    state::{self, Observation},
    File, NewService, ScanEvent, ServiceId, Store,
};

use crate::error::{io_err, SyncError};

/// Classification of one scan event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// First time this path was seen.
    New,
    /// Modification time differs from the stored one.
    Modified,
    /// Unchanged on disk, but the previous pass never completed.
    Retried,
    Unchanged,
}

pub struct Reconciler {
    store: Arc<Store>,
}

impl Reconciler {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Reconcile one scanned file.
    ///
    /// On error the file row is left with `is_configured = false` and its
    /// previous services untouched, so the next scan retries it.
    pub fn reconcile(&self, event: &ScanEvent) -> Result<ScanOutcome, SyncError> {
        let stored = self.store.file_by_path(&event.path)?;
        let (file, outcome) = match stored {
            None => {
                let content = read(event)?;
                let file =
                    self.store
                        .add_file(&event.path, &event.name, &content, event.mod_time)?;
                (file, ScanOutcome::New)
            }
            Some(file) if file.last_modified != event.mod_time => {
                let content = read(event)?;
                let file = self.store.update_file(&file, &content, event.mod_time)?;
                (file, ScanOutcome::Modified)
            }
            Some(file) if !file.is_configured => (file, ScanOutcome::Retried),
            Some(_) => return Ok(ScanOutcome::Unchanged),
        };

        self.derive_services(&file)?;
        Ok(outcome)
    }

    /// The file at `path` disappeared: disown its services and forget it.
    /// Returns how many services were disowned, or `None` if the path was
    /// never stored.
    pub fn remove(&self, path: &Path) -> Result<Option<usize>, SyncError> {
        Ok(self.store.remove_file(path)?)
    }

    fn derive_services(&self, file: &File) -> Result<(), SyncError> {
        let definitions = codec::decode(&file.content).map_err(|source| SyncError::Decode {
            path: file.path.clone(),
            source,
        })?;

        let mut batch = Vec::with_capacity(definitions.len());
        for (name, definition) in &definitions {
            let content = codec::canonicalize(definition).map_err(|source| SyncError::Encode {
                service: name.clone(),
                source,
            })?;
            batch.push(NewService {
                name: name.clone(),
                content,
                state: state::initial(),
            });
        }

        let inserted = self.store.replace_services_for_file(file, &batch)?;
        let keep: Vec<ServiceId> = inserted.iter().map(|s| s.id).collect();
        self.store.orphan_services_of(file.id, &keep)?;

        // Rows come back in batch order, which is the map's key order.
        for (service, definition) in inserted.iter().zip(definitions.values()) {
            let Some(transition) = state::observe(service.state, &Observation::fresh(definition))
            else {
                continue;
            };
            if transition.changes_state() {
                self.store
                    .set_service_state(service.id, transition.from, transition.to)?;
            }
        }

        self.store.mark_file_applied(file.id)?;
        Ok(())
    }
}

fn read(event: &ScanEvent) -> Result<String, SyncError> {
    event.read_content().map_err(|e| io_err(&event.path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use warden_core::ServiceState;

    fn reconciler() -> (Arc<Store>, Reconciler) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.ensure_schema().unwrap();
        (store.clone(), Reconciler::new(store))
    }

    #[test]
    fn unchanged_file_is_not_reread() {
        let (store, r) = reconciler();
        let t = Utc::now();
        let path = "/srv/services/sites.toml";
        r.reconcile(&ScanEvent::inline(path, t, "[a]\ndomain = \"a.example.com\"\n"))
            .unwrap();

        // OnDisk content for a path that does not exist: reading would fail.
        let outcome = r.reconcile(&ScanEvent::from_disk(path, t)).unwrap();
        assert_eq!(outcome, ScanOutcome::Unchanged);
        assert_eq!(store.live_services().unwrap().len(), 1);
    }

    #[test]
    fn plaintext_definition_stays_not_configured() {
        let (store, r) = reconciler();
        r.reconcile(&ScanEvent::inline(
            "/srv/a.toml",
            Utc::now(),
            "[a]\ndomain = \"a.example.com\"\n",
        ))
        .unwrap();
        let services = store.live_services().unwrap();
        assert_eq!(services[0].state, ServiceState::NotConfigured);
    }

    #[test]
    fn decode_error_leaves_previous_services_in_place() {
        let (store, r) = reconciler();
        let t0 = Utc::now();
        r.reconcile(&ScanEvent::inline("/srv/a.toml", t0, "[a]\ndomain = \"a.example.com\"\n"))
            .unwrap();
        let before = store.live_services().unwrap();

        let t1 = t0 + Duration::seconds(1);
        let err = r
            .reconcile(&ScanEvent::inline("/srv/a.toml", t1, "[a\n"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));

        assert_eq!(store.live_services().unwrap(), before);
        let file = store.file_by_path(Path::new("/srv/a.toml")).unwrap().unwrap();
        assert!(!file.is_configured);
        assert_eq!(file.content, "[a\n");
    }

    #[test]
    fn empty_file_disowns_all_previous_services() {
        let (store, r) = reconciler();
        let t0 = Utc::now();
        r.reconcile(&ScanEvent::inline("/srv/a.toml", t0, "[a]\ndomain = \"a.example.com\"\n"))
            .unwrap();
        let outcome = r
            .reconcile(&ScanEvent::inline("/srv/a.toml", t0 + Duration::seconds(1), ""))
            .unwrap();
        assert_eq!(outcome, ScanOutcome::Modified);
        assert!(store.live_services().unwrap().is_empty());
        assert_eq!(store.orphan_services().unwrap().len(), 1);
    }

    #[test]
    fn remove_unknown_path_is_none() {
        let (_, r) = reconciler();
        assert_eq!(r.remove(Path::new("/srv/never.toml")).unwrap(), None);
    }
}
