//! Services directory walker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use warden_core::{ScanEvent, Store};

use crate::error::{io_err, SyncError};

/// Extension of service definition files.
pub const DEFINITION_EXTENSION: &str = "toml";

/// One look at the services directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSnapshot {
    /// Definition files on disk, sorted by path.
    pub events: Vec<ScanEvent>,
    /// Stored files that are no longer on disk.
    pub vanished: Vec<PathBuf>,
    /// Definition files whose path is not valid UTF-8. They are never
    /// stored, so they are neither reconciled nor reported as vanished.
    pub rejected: Vec<PathBuf>,
}

/// Non-recursive walker over `*.toml` files in one directory.
pub struct Scanner {
    dir: PathBuf,
}

impl Scanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List definition files; content is read lazily by the reconciler.
    /// Returns the usable files and the rejected non-UTF-8 paths.
    fn list(&self) -> Result<(Vec<ScanEvent>, Vec<PathBuf>), SyncError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let mut events = Vec::new();
        let mut rejected = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let path = entry.path();
            if !is_definition(&path) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            if path.to_str().is_none() {
                tracing::warn!(path = %path.display(), "definition path is not valid UTF-8, skipped");
                rejected.push(path);
                continue;
            }
            let modified = meta.modified().map_err(|e| io_err(&path, e))?;
            events.push(ScanEvent::from_disk(path, DateTime::<Utc>::from(modified)));
        }
        events.sort_by(|a, b| a.path.cmp(&b.path));
        rejected.sort();
        Ok((events, rejected))
    }

    /// Files on disk plus stored files that disappeared.
    pub fn snapshot(&self, store: &Store) -> Result<ScanSnapshot, SyncError> {
        let (events, rejected) = self.list()?;
        let seen: HashSet<&Path> = events.iter().map(|e| e.path.as_path()).collect();
        let vanished = store
            .list_files()?
            .into_iter()
            .map(|f| f.path)
            .filter(|p| !seen.contains(p.as_path()))
            .collect();
        Ok(ScanSnapshot {
            events,
            vanished,
            rejected,
        })
    }
}

/// Whether `path` names a service definition file (by extension only).
pub fn is_definition(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(DEFINITION_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn snapshot(dir: &Path) -> Result<ScanSnapshot, SyncError> {
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        Scanner::new(dir).snapshot(&store)
    }

    #[test]
    fn lists_only_toml_files_at_top_level() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.toml"), "").unwrap();
        fs::write(dir.path().join("a.toml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.toml"), "").unwrap();
        fs::create_dir_all(dir.path().join("dir.toml")).unwrap();

        let events = snapshot(dir.path()).unwrap().events;
        let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn event_carries_file_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.toml");
        fs::write(&path, "").unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        set_file_mtime(&path, FileTime::from_system_time(old)).unwrap();

        let events = snapshot(dir.path()).unwrap().events;
        assert_eq!(events[0].mod_time, DateTime::<Utc>::from(old));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = snapshot(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }

    #[test]
    fn snapshot_reports_vanished_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kept.toml"), "").unwrap();
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
            .add_file(&dir.path().join("kept.toml"), "kept", "", Utc::now())
            .unwrap();
        store
            .add_file(&dir.path().join("gone.toml"), "gone", "", Utc::now())
            .unwrap();

        let snapshot = Scanner::new(dir.path()).snapshot(&store).unwrap();
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.vanished, vec![dir.path().join("gone.toml")]);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_definition_is_rejected_not_listed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let odd = dir.path().join(OsStr::from_bytes(b"caf\xe9.toml"));
        if fs::write(&odd, "").is_err() {
            // Filesystems that insist on UTF-8 names cannot hold this case.
            return;
        }
        fs::write(dir.path().join("plain.toml"), "").unwrap();

        let snapshot = snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].name, "plain");
        assert_eq!(snapshot.rejected, vec![odd]);
        assert!(snapshot.vanished.is_empty());
    }
}
