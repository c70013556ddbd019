#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use warden_core::{ArtifactKind, ConfigArtifact, Store};
use warden_sync::{ApplyError, ArtifactWriter, Listener};

/// In-memory writer: tracks which artifact paths are "on disk" and can be
/// told to fail.
#[derive(Default)]
pub struct FakeWriter {
    on_disk: Mutex<BTreeSet<PathBuf>>,
    failing_kinds: Mutex<HashSet<ArtifactKind>>,
    failing_removals: Mutex<bool>,
}

impl FakeWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_apply(&self, kind: ArtifactKind, fail: bool) {
        let mut kinds = self.failing_kinds.lock().unwrap();
        if fail {
            kinds.insert(kind);
        } else {
            kinds.remove(&kind);
        }
    }

    pub fn fail_removals(&self, fail: bool) {
        *self.failing_removals.lock().unwrap() = fail;
    }

    pub fn on_disk(&self) -> Vec<PathBuf> {
        self.on_disk.lock().unwrap().iter().cloned().collect()
    }

    fn injected() -> ApplyError {
        ApplyError::Reload {
            command: "fake-reload".into(),
            detail: "injected failure".into(),
        }
    }
}

impl ArtifactWriter for FakeWriter {
    fn artifact_path(&self, listener: &Listener<'_>) -> PathBuf {
        PathBuf::from(format!(
            "/fake/{}.{}.{}.{}.conf",
            listener.file_name, listener.service.name, listener.service.id, listener.kind
        ))
    }

    fn apply(&self, listener: &Listener<'_>) -> Result<PathBuf, ApplyError> {
        if self.failing_kinds.lock().unwrap().contains(&listener.kind) {
            return Err(Self::injected());
        }
        let path = self.artifact_path(listener);
        self.on_disk.lock().unwrap().insert(path.clone());
        Ok(path)
    }

    fn remove(&self, artifact: &ConfigArtifact) -> Result<(), ApplyError> {
        if *self.failing_removals.lock().unwrap() {
            return Err(Self::injected());
        }
        self.on_disk.lock().unwrap().remove(&artifact.path);
        Ok(())
    }
}

pub fn store() -> Arc<Store> {
    let store = Store::open_in_memory().expect("open");
    store.ensure_schema().expect("schema");
    Arc::new(store)
}

pub fn definition(domain: &str, tls: bool) -> String {
    format!("[svc]\ndomain = \"{domain}\"\ntls = {tls}\n")
}
