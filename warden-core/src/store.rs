//! SQLite-backed store for files, services, and config artifacts.
//!
//! # Integrity rules
//!
//! - `files.path` and `config_artifacts.path` are unique.
//! - `services.file_id` and `config_artifacts.service_id` reference their
//!   owners without any `ON DELETE` action. Deleting an owner that still has
//!   dependants fails, so owners are always disowned first (reference set to
//!   `NULL`) and the orphans are reaped later by the cleaner.
//! - Orphaned services never change state: [`Store::set_service_state`] only
//!   matches rows that still have a file.
//!
//! The connection lives behind a mutex; SQLite serialises conflicting writes
//! through its own constraints.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{
    ArtifactId, ArtifactKind, ConfigArtifact, File, FileId, NewService, Service, ServiceId,
    ServiceState,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER NOT NULL PRIMARY KEY,
        path TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        content TEXT NOT NULL,
        is_configured BOOLEAN NOT NULL DEFAULT FALSE,
        last_modified DATETIME NOT NULL
    )",
    // file_id is nulled when the file is removed or re-decoded; the cleaner
    // deletes services whose file_id is null.
    "CREATE TABLE IF NOT EXISTS services (
        id INTEGER NOT NULL PRIMARY KEY,
        file_id INTEGER REFERENCES files (id),
        name TEXT NOT NULL,
        content TEXT NOT NULL,
        state TEXT NOT NULL,
        last_modified DATETIME NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_services_file_id ON services (file_id)",
    "CREATE TABLE IF NOT EXISTS config_artifacts (
        id INTEGER NOT NULL PRIMARY KEY,
        service_id INTEGER REFERENCES services (id),
        type TEXT NOT NULL,
        path TEXT NOT NULL UNIQUE,
        last_modified DATETIME NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_config_artifacts_service_id ON config_artifacts (service_id)",
];

const FILE_COLUMNS: &str = "id, path, name, content, is_configured, last_modified";
const SERVICE_COLUMNS: &str = "id, file_id, name, content, state, last_modified";
const ARTIFACT_COLUMNS: &str = "id, service_id, type, path, last_modified";

/// Row counts reported by `warden status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub files: usize,
    pub files_pending: usize,
    pub live_services: usize,
    pub orphan_services: usize,
    pub artifacts: usize,
    pub orphan_artifacts: usize,
    /// Live services per state, in lifecycle order.
    pub by_state: Vec<(ServiceState, usize)>,
}

/// Durable record of files, services, and artifacts.
pub struct Store {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the database at `path`.
    ///
    /// The schema is not touched; call [`Store::ensure_schema`] before use.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::configure(conn, path.to_path_buf())
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, PathBuf::from(":memory:"))
    }

    fn configure(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn with_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    /// Create all tables in one transaction. Idempotent; on failure nothing
    /// is created.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Schema)?;
        for statement in SCHEMA {
            tx.execute(statement, []).map_err(StoreError::Schema)?;
        }
        tx.commit().map_err(StoreError::Schema)?;
        tracing::debug!(path = %self.path.display(), "store schema ready");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    pub fn file_by_path(&self, path: &Path) -> Result<Option<File>, StoreError> {
        let text = path_text(path)?;
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1"),
                params![text],
                RawFile::from_row,
            )
            .optional()?;
        raw.map(RawFile::into_file).transpose()
    }

    pub fn file_by_id(&self, id: FileId) -> Result<Option<File>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id.0],
                RawFile::from_row,
            )
            .optional()?;
        raw.map(RawFile::into_file).transpose()
    }

    pub fn list_files(&self) -> Result<Vec<File>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {FILE_COLUMNS} FROM files ORDER BY path"))?;
        let rows = stmt
            .query_map([], RawFile::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawFile::into_file).collect()
    }

    /// Insert a newly discovered file. Fails with
    /// [`StoreError::Constraint`] if `path` is already stored, and with
    /// [`StoreError::NonUtf8Path`] if it cannot be stored exactly.
    pub fn add_file(
        &self,
        path: &Path,
        name: &str,
        content: &str,
        mod_time: DateTime<Utc>,
    ) -> Result<File, StoreError> {
        let text = path_text(path)?;
        let id = self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO files (path, name, content, is_configured, last_modified)
                 VALUES (?1, ?2, ?3, FALSE, ?4)",
                params![text, name, content, timestamp(&mod_time)],
            )?;
            Ok(FileId(tx.last_insert_rowid()))
        })?;

        tracing::info!(path = %path.display(), file_id = %id, "file added");
        Ok(File {
            id,
            path: path.to_path_buf(),
            name: name.to_string(),
            content: content.to_string(),
            is_configured: false,
            last_modified: mod_time,
        })
    }

    /// Store new content for `existing`. Resets `is_configured`: any change
    /// invalidates downstream configuration until it is re-applied.
    pub fn update_file(
        &self,
        existing: &File,
        content: &str,
        mod_time: DateTime<Utc>,
    ) -> Result<File, StoreError> {
        let changed = self.with_transaction(|tx| {
            Ok(tx.execute(
                "UPDATE files SET content = ?1, is_configured = FALSE, last_modified = ?2
                 WHERE id = ?3",
                params![content, timestamp(&mod_time), existing.id.0],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "file",
                id: existing.id.0,
            });
        }

        tracing::info!(path = %existing.path.display(), file_id = %existing.id, "file updated");
        Ok(File {
            content: content.to_string(),
            is_configured: false,
            last_modified: mod_time,
            ..existing.clone()
        })
    }

    pub fn mark_file_applied(&self, id: FileId) -> Result<(), StoreError> {
        let changed = self.with_transaction(|tx| {
            Ok(tx.execute(
                "UPDATE files SET is_configured = TRUE WHERE id = ?1",
                params![id.0],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "file",
                id: id.0,
            });
        }
        Ok(())
    }

    /// Forget the file at `path`: disown its services and delete the row in
    /// one transaction. Returns the number of services disowned, or `None`
    /// when no such file is stored.
    pub fn remove_file(&self, path: &Path) -> Result<Option<usize>, StoreError> {
        let text = path_text(path)?;
        let removed = self.with_transaction(|tx| {
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM files WHERE path = ?1",
                    params![text],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else {
                return Ok(None);
            };
            let disowned = tx.execute(
                "UPDATE services SET file_id = NULL WHERE file_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
            Ok(Some((FileId(id), disowned)))
        })?;

        Ok(removed.map(|(id, disowned)| {
            tracing::info!(
                path = %path.display(),
                file_id = %id,
                disowned,
                "file removed",
            );
            disowned
        }))
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    /// Insert one fresh row per definition. Earlier rows of the file are left
    /// alone; see [`Store::orphan_services_of`].
    pub fn replace_services_for_file(
        &self,
        file: &File,
        services: &[NewService],
    ) -> Result<Vec<Service>, StoreError> {
        let inserted = self.with_transaction(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO services (file_id, name, content, state, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut inserted = Vec::with_capacity(services.len());
            for new in services {
                stmt.execute(params![
                    file.id.0,
                    new.name,
                    new.content,
                    new.state.as_str(),
                    timestamp(&file.last_modified),
                ])?;
                inserted.push(Service {
                    id: ServiceId(tx.last_insert_rowid()),
                    file_id: Some(file.id),
                    name: new.name.clone(),
                    content: new.content.clone(),
                    state: new.state,
                    last_modified: file.last_modified,
                });
            }
            Ok(inserted)
        })?;

        tracing::info!(
            path = %file.path.display(),
            file_id = %file.id,
            count = inserted.len(),
            "services added for file",
        );
        Ok(inserted)
    }

    /// Disown every service of `file_id` except those in `keep`.
    pub fn orphan_services_of(
        &self,
        file_id: FileId,
        keep: &[ServiceId],
    ) -> Result<usize, StoreError> {
        let disowned = self.with_transaction(|tx| {
            let ids = {
                let mut stmt = tx.prepare("SELECT id FROM services WHERE file_id = ?1")?;
                let ids = stmt
                    .query_map(params![file_id.0], |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };
            let mut disowned = 0;
            for id in ids.into_iter().filter(|id| !keep.contains(&ServiceId(*id))) {
                disowned += tx.execute(
                    "UPDATE services SET file_id = NULL WHERE id = ?1",
                    params![id],
                )?;
            }
            Ok(disowned)
        })?;

        if disowned > 0 {
            tracing::debug!(file_id = %file_id, disowned, "superseded services disowned");
        }
        Ok(disowned)
    }

    pub fn service(&self, id: ServiceId) -> Result<Option<Service>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
                params![id.0],
                RawService::from_row,
            )
            .optional()?;
        raw.map(RawService::into_service).transpose()
    }

    pub fn services_of(&self, file_id: FileId) -> Result<Vec<Service>, StoreError> {
        self.query_services(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE file_id = ?1 ORDER BY id"),
            Some(file_id.0),
        )
    }

    /// Services that still belong to a file.
    pub fn live_services(&self) -> Result<Vec<Service>, StoreError> {
        self.query_services(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE file_id IS NOT NULL ORDER BY id"),
            None,
        )
    }

    /// Services whose file reference has been nulled.
    pub fn orphan_services(&self) -> Result<Vec<Service>, StoreError> {
        self.query_services(
            &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE file_id IS NULL ORDER BY id"),
            None,
        )
    }

    fn query_services(&self, sql: &str, arg: Option<i64>) -> Result<Vec<Service>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match arg {
            Some(arg) => stmt.query_map(params![arg], RawService::from_row)?,
            None => stmt.query_map([], RawService::from_row)?,
        }
        .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawService::into_service).collect()
    }

    /// Compare-and-set the state of a live service. Returns `false` when the
    /// row is orphaned, gone, or no longer in `from`.
    pub fn set_service_state(
        &self,
        id: ServiceId,
        from: ServiceState,
        to: ServiceState,
    ) -> Result<bool, StoreError> {
        if from == to {
            return Ok(true);
        }
        let changed = self.with_transaction(|tx| {
            Ok(tx.execute(
                "UPDATE services SET state = ?1
                 WHERE id = ?2 AND state = ?3 AND file_id IS NOT NULL",
                params![to.as_str(), id.0, from.as_str()],
            )?)
        })?;
        if changed > 0 {
            tracing::info!(service_id = %id, from = %from, to = %to, "service state changed");
        }
        Ok(changed > 0)
    }

    /// Delete orphaned services whose artifacts have been torn down. Their
    /// artifact rows are disowned in the same transaction. Rows that regained
    /// a file or no longer exist are skipped. Returns the number deleted.
    pub fn delete_orphan_services(&self, ids: &[ServiceId]) -> Result<usize, StoreError> {
        self.with_transaction(|tx| {
            let mut deleted = 0;
            for id in ids {
                let orphaned: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM services WHERE id = ?1 AND file_id IS NULL",
                        params![id.0],
                        |row| row.get(0),
                    )
                    .optional()?;
                if orphaned.is_none() {
                    continue;
                }
                tx.execute(
                    "UPDATE config_artifacts SET service_id = NULL WHERE service_id = ?1",
                    params![id.0],
                )?;
                deleted += tx.execute("DELETE FROM services WHERE id = ?1", params![id.0])?;
            }
            Ok(deleted)
        })
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Record that `service` owns an artifact at `path`. Idempotent for the
    /// same owner; a path held by another row is a constraint violation.
    pub fn record_artifact(
        &self,
        service: ServiceId,
        kind: ArtifactKind,
        path: &Path,
    ) -> Result<ConfigArtifact, StoreError> {
        let text = path_text(path)?;
        let raw = self.with_transaction(|tx| {
            let existing = tx
                .query_row(
                    &format!("SELECT {ARTIFACT_COLUMNS} FROM config_artifacts WHERE path = ?1"),
                    params![text],
                    RawArtifact::from_row,
                )
                .optional()?;
            if let Some(existing) = existing {
                if existing.service_id == Some(service.0) && existing.kind == kind.as_str() {
                    return Ok(existing);
                }
                return Err(StoreError::Constraint(format!(
                    "artifact path {} already recorded",
                    path.display()
                )));
            }

            let now = timestamp(&Utc::now());
            tx.execute(
                "INSERT INTO config_artifacts (service_id, type, path, last_modified)
                 VALUES (?1, ?2, ?3, ?4)",
                params![service.0, kind.as_str(), text, now],
            )?;
            Ok(RawArtifact {
                id: tx.last_insert_rowid(),
                service_id: Some(service.0),
                kind: kind.as_str().to_string(),
                path: text.to_string(),
                last_modified: now,
            })
        })?;
        raw.into_artifact()
    }

    pub fn artifacts_of(&self, service: ServiceId) -> Result<Vec<ConfigArtifact>, StoreError> {
        self.query_artifacts(
            &format!(
                "SELECT {ARTIFACT_COLUMNS} FROM config_artifacts WHERE service_id = ?1 ORDER BY id"
            ),
            Some(service.0),
        )
    }

    /// Artifacts whose service reference has been nulled.
    pub fn orphan_artifacts(&self) -> Result<Vec<ConfigArtifact>, StoreError> {
        self.query_artifacts(
            &format!(
                "SELECT {ARTIFACT_COLUMNS} FROM config_artifacts WHERE service_id IS NULL ORDER BY id"
            ),
            None,
        )
    }

    pub fn list_artifacts(&self) -> Result<Vec<ConfigArtifact>, StoreError> {
        self.query_artifacts(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM config_artifacts ORDER BY id"),
            None,
        )
    }

    fn query_artifacts(
        &self,
        sql: &str,
        arg: Option<i64>,
    ) -> Result<Vec<ConfigArtifact>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match arg {
            Some(arg) => stmt.query_map(params![arg], RawArtifact::from_row)?,
            None => stmt.query_map([], RawArtifact::from_row)?,
        }
        .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawArtifact::into_artifact).collect()
    }

    /// Delete an artifact row whose file is confirmed gone from disk.
    pub fn delete_artifact(&self, id: ArtifactId) -> Result<bool, StoreError> {
        let deleted = self.with_transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM config_artifacts WHERE id = ?1",
                params![id.0],
            )?)
        })?;
        Ok(deleted > 0)
    }

    /// Delete orphaned artifact rows whose files are confirmed gone. Rows
    /// that are owned again or missing are skipped.
    pub fn delete_orphan_artifacts(&self, ids: &[ArtifactId]) -> Result<usize, StoreError> {
        self.with_transaction(|tx| {
            let mut deleted = 0;
            for id in ids {
                deleted += tx.execute(
                    "DELETE FROM config_artifacts WHERE id = ?1 AND service_id IS NULL",
                    params![id.0],
                )?;
            }
            Ok(deleted)
        })
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let mut by_state = Vec::new();
        for state in ServiceState::all() {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM services WHERE state = ?1 AND file_id IS NOT NULL",
                params![state.as_str()],
                |row| row.get(0),
            )?;
            by_state.push((*state, n as usize));
        }

        Ok(StoreSummary {
            files: count("SELECT COUNT(*) FROM files")?,
            files_pending: count("SELECT COUNT(*) FROM files WHERE is_configured = FALSE")?,
            live_services: count("SELECT COUNT(*) FROM services WHERE file_id IS NOT NULL")?,
            orphan_services: count("SELECT COUNT(*) FROM services WHERE file_id IS NULL")?,
            artifacts: count("SELECT COUNT(*) FROM config_artifacts")?,
            orphan_artifacts: count(
                "SELECT COUNT(*) FROM config_artifacts WHERE service_id IS NULL",
            )?,
            by_state,
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidColumn {
            column,
            value: value.to_string(),
        })
}

/// Paths are stored as text, so only UTF-8 paths round-trip exactly.
fn path_text(path: &Path) -> Result<&str, StoreError> {
    path.to_str()
        .ok_or_else(|| StoreError::NonUtf8Path(path.to_path_buf()))
}

struct RawFile {
    id: i64,
    path: String,
    name: String,
    content: String,
    is_configured: bool,
    last_modified: String,
}

impl RawFile {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            name: row.get(2)?,
            content: row.get(3)?,
            is_configured: row.get(4)?,
            last_modified: row.get(5)?,
        })
    }

    fn into_file(self) -> Result<File, StoreError> {
        Ok(File {
            id: FileId(self.id),
            path: PathBuf::from(self.path),
            name: self.name,
            content: self.content,
            is_configured: self.is_configured,
            last_modified: parse_timestamp("files.last_modified", &self.last_modified)?,
        })
    }
}

struct RawService {
    id: i64,
    file_id: Option<i64>,
    name: String,
    content: String,
    state: String,
    last_modified: String,
}

impl RawService {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file_id: row.get(1)?,
            name: row.get(2)?,
            content: row.get(3)?,
            state: row.get(4)?,
            last_modified: row.get(5)?,
        })
    }

    fn into_service(self) -> Result<Service, StoreError> {
        let state = self
            .state
            .parse::<ServiceState>()
            .map_err(|err| StoreError::InvalidColumn {
                column: "services.state",
                value: err.value,
            })?;
        Ok(Service {
            id: ServiceId(self.id),
            file_id: self.file_id.map(FileId),
            name: self.name,
            content: self.content,
            state,
            last_modified: parse_timestamp("services.last_modified", &self.last_modified)?,
        })
    }
}

struct RawArtifact {
    id: i64,
    service_id: Option<i64>,
    kind: String,
    path: String,
    last_modified: String,
}

impl RawArtifact {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            service_id: row.get(1)?,
            kind: row.get(2)?,
            path: row.get(3)?,
            last_modified: row.get(4)?,
        })
    }

    fn into_artifact(self) -> Result<ConfigArtifact, StoreError> {
        let kind = self
            .kind
            .parse::<ArtifactKind>()
            .map_err(|err| StoreError::InvalidColumn {
                column: "config_artifacts.type",
                value: err.value,
            })?;
        Ok(ConfigArtifact {
            id: ArtifactId(self.id),
            service_id: self.service_id.map(ServiceId),
            kind,
            path: PathBuf::from(self.path),
            last_modified: parse_timestamp("config_artifacts.last_modified", &self.last_modified)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
