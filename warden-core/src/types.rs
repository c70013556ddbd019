//! Domain types for the warden store.
//!
//! Every row kind is addressed by an integer identity newtype. Path fields use
//! `PathBuf`; timestamps are `DateTime<Utc>`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateParseError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of a row in the `files` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for FileId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identity of a row in the `services` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(pub i64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for ServiceId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identity of a row in the `config_artifacts` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(pub i64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for ArtifactId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Configuration lifecycle of a single service row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum ServiceState {
    #[default]
    #[serde(rename = "not configured")]
    NotConfigured,
    #[serde(rename = "to configure https")]
    ToConfigureHttps,
    #[serde(rename = "configured")]
    Configured,
    #[serde(rename = "to disable http")]
    ToDisableHttp,
}

impl ServiceState {
    /// All states in lifecycle order.
    pub fn all() -> &'static [ServiceState] {
        &[
            ServiceState::NotConfigured,
            ServiceState::ToConfigureHttps,
            ServiceState::Configured,
            ServiceState::ToDisableHttp,
        ]
    }

    /// Column value stored in `services.state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::NotConfigured => "not configured",
            ServiceState::ToConfigureHttps => "to configure https",
            ServiceState::Configured => "configured",
            ServiceState::ToDisableHttp => "to disable http",
        }
    }

    /// `true` for states that wait on an artifact writer confirmation.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ServiceState::ToConfigureHttps | ServiceState::ToDisableHttp
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceState::all()
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StateParseError {
                what: "service state",
                value: s.to_string(),
            })
    }
}

/// Listener flavour of a generated proxy configuration fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Plaintext listener.
    Http,
    /// Encrypted listener.
    Https,
}

impl ArtifactKind {
    /// Column value stored in `config_artifacts.type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Http => "http",
            ArtifactKind::Https => "https",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ArtifactKind::Http),
            "https" => Ok(ArtifactKind::Https),
            other => Err(StateParseError {
                what: "artifact kind",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A discovered service-definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub path: PathBuf,
    /// File name without its extension.
    pub name: String,
    pub content: String,
    /// Set once every decoded service of the last pass was persisted.
    pub is_configured: bool,
    pub last_modified: DateTime<Utc>,
}

/// One declared proxy service, decoded from a [`File`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    /// `None` once the owning file was removed or re-decoded.
    pub file_id: Option<FileId>,
    pub name: String,
    /// Canonical definition text.
    pub content: String,
    pub state: ServiceState,
    pub last_modified: DateTime<Utc>,
}

impl Service {
    /// Orphaned rows only wait for the cleaner; they never transition.
    pub fn is_orphaned(&self) -> bool {
        self.file_id.is_none()
    }
}

/// A generated proxy configuration fragment on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigArtifact {
    pub id: ArtifactId,
    pub service_id: Option<ServiceId>,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub last_modified: DateTime<Utc>,
}

impl ConfigArtifact {
    pub fn is_orphaned(&self) -> bool {
        self.service_id.is_none()
    }
}

/// Input row for a fresh service insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    pub name: String,
    pub content: String,
    pub state: ServiceState,
}

// ---------------------------------------------------------------------------
// Scan events
// ---------------------------------------------------------------------------

/// Where a [`ScanEvent`] reads its payload from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanContent {
    /// Read lazily from `ScanEvent::path`.
    OnDisk,
    /// Already in memory.
    Inline(String),
}

/// One file observed by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub path: PathBuf,
    pub name: String,
    pub mod_time: DateTime<Utc>,
    pub content: ScanContent,
}

impl ScanEvent {
    /// Event whose payload is read from disk only when needed.
    pub fn from_disk(path: impl Into<PathBuf>, mod_time: DateTime<Utc>) -> Self {
        let path = path.into();
        Self {
            name: display_name(&path),
            path,
            mod_time,
            content: ScanContent::OnDisk,
        }
    }

    /// Event carrying its payload.
    pub fn inline(
        path: impl Into<PathBuf>,
        mod_time: DateTime<Utc>,
        content: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            name: display_name(&path),
            path,
            mod_time,
            content: ScanContent::Inline(content.into()),
        }
    }

    pub fn read_content(&self) -> std::io::Result<String> {
        match &self.content {
            ScanContent::OnDisk => std::fs::read_to_string(&self.path),
            ScanContent::Inline(content) => Ok(content.clone()),
        }
    }
}

/// `sites.toml` → `sites`.
pub fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_roundtrip() {
        for state in ServiceState::all() {
            let parsed: ServiceState = state.as_str().parse().expect("parse");
            assert_eq!(parsed, *state);
        }
        assert_eq!(ServiceState::ToConfigureHttps.to_string(), "to configure https");
    }

    #[test]
    fn unknown_state_is_rejected() {
        let err = "half configured".parse::<ServiceState>().unwrap_err();
        assert!(err.to_string().contains("half configured"));
    }

    #[test]
    fn artifact_kind_display() {
        assert_eq!(ArtifactKind::Http.to_string(), "http");
        assert_eq!("https".parse::<ArtifactKind>().unwrap(), ArtifactKind::Https);
        assert!("tcp".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn transitional_states() {
        assert!(ServiceState::ToConfigureHttps.is_transitional());
        assert!(ServiceState::ToDisableHttp.is_transitional());
        assert!(!ServiceState::Configured.is_transitional());
        assert!(!ServiceState::NotConfigured.is_transitional());
    }

    #[test]
    fn display_name_strips_extension() {
        assert_eq!(display_name(Path::new("/srv/warden/sites.toml")), "sites");
        assert_eq!(display_name(Path::new("plain")), "plain");
    }

    #[test]
    fn inline_event_reads_its_payload() {
        let event = ScanEvent::inline("/tmp/sites.toml", Utc::now(), "[svc]\n");
        assert_eq!(event.name, "sites");
        assert_eq!(event.read_content().unwrap(), "[svc]\n");
    }
}
