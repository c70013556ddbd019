//! `warden.yaml` settings.
//!
//! # Storage layout
//!
//! ```text
//! <home>/.warden/
//!   warden.yaml   (settings, optional)
//!   warden.db     (store)
//!   services/     (watched service definitions, *.toml)
//!   nginx/        (generated listener fragments)
//!   templates/    (optional listener template overrides)
//! ```
//!
//! Every function takes an explicit `home`; [`home`] resolves the default
//! from `WARDEN_HOME` or `dirs::home_dir()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{settings_io, SettingsError};

pub const SETTINGS_FILE: &str = "warden.yaml";
pub const HOME_ENV: &str = "WARDEN_HOME";

const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;
const DEFAULT_CLEAN_INTERVAL_SECS: u64 = 60;
const DEFAULT_ACME_ROOT: &str = "/var/www/acme";
const DEFAULT_CERTIFICATE_DIR: &str = "/etc/letsencrypt/live";

/// On-disk shape; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Program and arguments run after every artifact change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_dir: Option<PathBuf>,
}

/// Resolved settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub home: PathBuf,
    pub services_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub database: PathBuf,
    pub reload_command: Option<Vec<String>>,
    pub scan_interval: Duration,
    pub clean_interval: Duration,
    /// Overrides for the embedded listener templates; ignored when missing.
    pub templates_dir: PathBuf,
    pub acme_root: PathBuf,
    pub certificate_dir: PathBuf,
}

impl Settings {
    /// Defaults rooted at `<home>/.warden`.
    pub fn defaults(home: &Path) -> Self {
        Self::resolve(home, SettingsFile::default())
    }

    fn resolve(home: &Path, file: SettingsFile) -> Self {
        let root = warden_root(home);
        Self {
            home: home.to_path_buf(),
            services_dir: file.services_dir.unwrap_or_else(|| root.join("services")),
            artifacts_dir: file.artifacts_dir.unwrap_or_else(|| root.join("nginx")),
            database: file.database.unwrap_or_else(|| root.join("warden.db")),
            reload_command: file.reload_command.filter(|cmd| !cmd.is_empty()),
            scan_interval: Duration::from_secs(
                file.scan_interval_secs
                    .unwrap_or(DEFAULT_SCAN_INTERVAL_SECS)
                    .max(1),
            ),
            clean_interval: Duration::from_secs(
                file.clean_interval_secs
                    .unwrap_or(DEFAULT_CLEAN_INTERVAL_SECS)
                    .max(1),
            ),
            templates_dir: file.templates_dir.unwrap_or_else(|| root.join("templates")),
            acme_root: file
                .acme_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ACME_ROOT)),
            certificate_dir: file
                .certificate_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CERTIFICATE_DIR)),
        }
    }

    /// Load `<home>/.warden/warden.yaml`, falling back to defaults when the
    /// file does not exist.
    pub fn load_at(home: &Path) -> Result<Self, SettingsError> {
        let path = settings_path_at(home);
        if !path.exists() {
            return Ok(Self::defaults(home));
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| settings_io(&path, e))?;
        let file: SettingsFile = serde_yaml::from_str(&contents)
            .map_err(|source| SettingsError::Parse { path, source })?;
        Ok(Self::resolve(home, file))
    }

    /// On-disk form of these settings.
    pub fn to_file(&self) -> SettingsFile {
        SettingsFile {
            services_dir: Some(self.services_dir.clone()),
            artifacts_dir: Some(self.artifacts_dir.clone()),
            database: Some(self.database.clone()),
            reload_command: self.reload_command.clone(),
            scan_interval_secs: Some(self.scan_interval.as_secs()),
            clean_interval_secs: Some(self.clean_interval.as_secs()),
            templates_dir: Some(self.templates_dir.clone()),
            acme_root: Some(self.acme_root.clone()),
            certificate_dir: Some(self.certificate_dir.clone()),
        }
    }

    /// Save atomically: write `warden.yaml.tmp`, then rename.
    pub fn save_at(&self, home: &Path) -> Result<PathBuf, SettingsError> {
        let path = settings_path_at(home);
        let dir = warden_root(home);
        std::fs::create_dir_all(&dir).map_err(|e| settings_io(&dir, e))?;

        let yaml = serde_yaml::to_string(&self.to_file())?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(|e| settings_io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| settings_io(&path, e))?;
        Ok(path)
    }

    /// Create the services and artifacts directories.
    pub fn ensure_dirs(&self) -> Result<(), SettingsError> {
        for dir in [&self.services_dir, &self.artifacts_dir] {
            std::fs::create_dir_all(dir).map_err(|e| settings_io(dir, e))?;
        }
        Ok(())
    }
}

/// `<home>/.warden`
pub fn warden_root(home: &Path) -> PathBuf {
    home.join(".warden")
}

/// `<home>/.warden/warden.yaml`
pub fn settings_path_at(home: &Path) -> PathBuf {
    warden_root(home).join(SETTINGS_FILE)
}

/// `$WARDEN_HOME`, else the user's home directory.
pub fn home() -> Result<PathBuf, SettingsError> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir().ok_or(SettingsError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_file_missing() {
        let home = TempDir::new().unwrap();
        let settings = Settings::load_at(home.path()).unwrap();
        assert_eq!(settings, Settings::defaults(home.path()));
        assert_eq!(settings.database, home.path().join(".warden").join("warden.db"));
        assert_eq!(settings.scan_interval, Duration::from_secs(30));
        assert!(settings.reload_command.is_none());
        assert_eq!(settings.certificate_dir, PathBuf::from("/etc/letsencrypt/live"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(warden_root(home.path())).unwrap();
        std::fs::write(
            settings_path_at(home.path()),
            "reload_command: [nginx, -s, reload]\nclean_interval_secs: 5\n",
        )
        .unwrap();

        let settings = Settings::load_at(home.path()).unwrap();
        assert_eq!(
            settings.reload_command,
            Some(vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()])
        );
        assert_eq!(settings.clean_interval, Duration::from_secs(5));
        assert_eq!(settings.scan_interval, Duration::from_secs(30));
    }

    #[test]
    fn empty_reload_command_means_none() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(warden_root(home.path())).unwrap();
        std::fs::write(settings_path_at(home.path()), "reload_command: []\n").unwrap();
        assert!(Settings::load_at(home.path()).unwrap().reload_command.is_none());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let mut settings = Settings::defaults(home.path());
        settings.scan_interval = Duration::from_secs(7);
        settings.save_at(home.path()).unwrap();

        let tmp = settings_path_at(home.path()).with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be removed after save");
        assert_eq!(Settings::load_at(home.path()).unwrap(), settings);
    }

    #[test]
    fn corrupt_file_reports_path() {
        let home = TempDir::new().unwrap();
        std::fs::create_dir_all(warden_root(home.path())).unwrap();
        std::fs::write(settings_path_at(home.path()), "scan_interval_secs: [oops").unwrap();
        let err = Settings::load_at(home.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("warden.yaml"));
    }
}
