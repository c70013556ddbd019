//! Full passes against a real services directory and artifacts directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;
use warden_core::Settings;
use warden_sync::Pipeline;

fn setup() -> (TempDir, Settings, Pipeline) {
    let home = TempDir::new().expect("home");
    let settings = Settings::defaults(home.path());
    settings.ensure_dirs().expect("dirs");
    let pipeline = Pipeline::open(&settings).expect("pipeline");
    (home, settings, pipeline)
}

fn write_definition(path: &Path, body: &str, secs: u64) {
    fs::write(path, body).expect("write definition");
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
    set_file_mtime(path, FileTime::from_system_time(mtime)).expect("set mtime");
}

fn artifacts(settings: &Settings) -> Vec<PathBuf> {
    let mut paths: Vec<_> = fs::read_dir(&settings.artifacts_dir)
        .expect("artifacts dir")
        .map(|e| e.expect("entry").path())
        .collect();
    paths.sort();
    paths
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn definition_lifecycle_on_disk() {
    let (_home, settings, pipeline) = setup();
    let sites = settings.services_dir.join("sites.toml");
    write_definition(&sites, "[svc]\ndomain = \"a.example.com\"\ntls = true\n", 1_700_000_000);

    let first = pipeline.scan_once().expect("first scan");
    assert_eq!(first.new, 1);
    assert!(first.failures.is_empty());
    assert_eq!(first.converge.effects_applied, 2);
    assert_eq!(
        names(&artifacts(&settings)),
        vec!["sites.svc.1.http.conf", "sites.svc.1.https.conf"]
    );

    let second = pipeline.scan_once().expect("second scan");
    assert_eq!(second.unchanged, 1);
    assert_eq!(names(&artifacts(&settings)), vec!["sites.svc.1.https.conf"]);

    write_definition(&sites, "[svc]\ndomain = \"a.example.com\"\n", 1_700_000_100);
    let third = pipeline.scan_once().expect("third scan");
    assert_eq!(third.modified, 1);

    let clean = pipeline.clean_once().expect("clean");
    assert_eq!(clean.services_deleted, 1);
    assert_eq!(names(&artifacts(&settings)), vec!["sites.svc.2.http.conf"]);

    fs::remove_file(&sites).unwrap();
    let fourth = pipeline.scan_once().expect("fourth scan");
    assert_eq!(fourth.removed, 1);
    pipeline.clean_once().expect("clean");
    assert!(artifacts(&settings).is_empty());

    let summary = pipeline.store().summary().unwrap();
    assert_eq!((summary.files, summary.live_services, summary.artifacts), (0, 0, 0));
}

#[test]
fn malformed_file_is_reported_without_aborting_the_pass() {
    let (_home, settings, pipeline) = setup();
    write_definition(&settings.services_dir.join("bad.toml"), "[svc\n", 1_700_000_000);
    write_definition(
        &settings.services_dir.join("good.toml"),
        "[web]\ndomain = \"web.example.com\"\n",
        1_700_000_000,
    );

    let summary = pipeline.scan_once().expect("scan");
    assert_eq!(summary.new, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].path.ends_with("bad.toml"));
    assert_eq!(names(&artifacts(&settings)), vec!["good.web.1.http.conf"]);

    // Still malformed, same mtime: retried and reported again.
    let again = pipeline.scan_once().expect("scan");
    assert_eq!(again.failures.len(), 1);
    assert_eq!(again.unchanged, 1);
}

#[test]
fn summary_serializes_to_json() {
    let (_home, _settings, pipeline) = setup();
    let summary = pipeline.scan_once().expect("scan");
    let json = serde_json::to_value(&summary).expect("json");
    assert_eq!(json["new"], 0);
    assert!(json["converge"].is_object());
}

#[cfg(unix)]
#[test]
fn non_utf8_definition_never_churns_services() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let (_home, settings, pipeline) = setup();
    let odd = settings
        .services_dir
        .join(OsStr::from_bytes(b"caf\xe9.toml"));
    if fs::write(&odd, "[cafe]\ndomain = \"cafe.example.com\"\n").is_err() {
        // Filesystem refuses non-UTF-8 names.
        return;
    }
    write_definition(
        &settings.services_dir.join("good.toml"),
        "[web]\ndomain = \"web.example.com\"\n",
        1_700_000_000,
    );

    for pass in 0..4 {
        let summary = pipeline.scan_once().expect("scan");
        assert_eq!(summary.removed, 0, "pass {pass}");
        assert_eq!(summary.failures.len(), 1, "pass {pass}");
        assert_eq!(summary.failures[0].path, odd, "pass {pass}");

        let store = pipeline.store();
        assert_eq!(store.live_services().unwrap().len(), 1, "pass {pass}");
        assert!(store.orphan_services().unwrap().is_empty(), "pass {pass}");
    }
    assert_eq!(names(&artifacts(&settings)), vec!["good.web.1.http.conf"]);
}

#[cfg(unix)]
#[test]
fn non_utf8_artifacts_dir_is_refused_at_open() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let home = TempDir::new().expect("home");
    let mut settings = Settings::defaults(home.path());
    settings.artifacts_dir = home.path().join(OsStr::from_bytes(b"ngin\xff"));

    let err = Pipeline::open(&settings).err().expect("open must fail");
    assert!(
        matches!(err, warden_sync::SyncError::NonUtf8ArtifactsDir { .. }),
        "got: {err}"
    );
}
