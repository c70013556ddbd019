use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use warden_core::Settings;
use warden_sync::{scanner, Pipeline};

use crate::error::{io_err, DaemonError};

/// Quiet period after the last watcher event before a scan is queued.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Why a scan was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanSource {
    Startup,
    Ticker,
    Watcher,
}

impl ScanSource {
    fn label(self) -> &'static str {
        match self {
            ScanSource::Startup => "startup",
            ScanSource::Ticker => "ticker",
            ScanSource::Watcher => "watcher",
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(settings: Settings) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings))
}

/// Run until ctrl-c.
pub async fn run(settings: Settings) -> Result<(), DaemonError> {
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    signal.map_err(|e| io_err("ctrl-c handler", e))?;
                    tracing::info!("received ctrl-c, shutting down daemon");
                    let _ = shutdown.send(());
                    Ok(())
                }
            }
        })
    };

    let result = run_until_shutdown(settings, shutdown_tx.clone()).await;
    let _ = shutdown_tx.send(());
    handle_join("signal_handler", signal_handle.await)?;
    result
}

/// Run until something is sent on `shutdown_tx`, or until any task fails.
pub async fn run_until_shutdown(
    settings: Settings,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    settings.ensure_dirs()?;
    let pipeline = {
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || Pipeline::open(&settings))
            .await
            .map_err(|e| join_err("pipeline_open", e))??
    };
    let pipeline = Arc::new(pipeline);
    tracing::info!(
        services_dir = %settings.services_dir.display(),
        artifacts_dir = %settings.artifacts_dir.display(),
        database = %settings.database.display(),
        "daemon started",
    );

    // Capacity 1: a scan that is already queued covers every later request.
    let (scan_tx, scan_rx) = mpsc::channel::<ScanSource>(1);
    request_scan(&scan_tx, ScanSource::Startup);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let dir = settings.services_dir.clone();
        let scan_tx = scan_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(dir, scan_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let result = scan_processor_task(pipeline, scan_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let ticker_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let every = settings.scan_interval;
        tokio::spawn(async move {
            let result = scan_ticker_task(every, scan_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let cleaner_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let every = settings.clean_interval;
        tokio::spawn(async move {
            let result = cleaner_task(pipeline, every, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let (watcher_result, processor_result, ticker_result, cleaner_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        ticker_handle,
        cleaner_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("scan_processor", processor_result)?;
    handle_join("scan_ticker", ticker_result)?;
    handle_join("cleaner", cleaner_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn watcher_task(
    services_dir: PathBuf,
    scan_tx: mpsc::Sender<ScanSource>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match the parent-directory check below.
    let services_dir = fs::canonicalize(&services_dir).map_err(|e| io_err(&services_dir, e))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&services_dir, RecursiveMode::NonRecursive)?;

    let mut debounce = Debounce::new(DEBOUNCE_WINDOW);

    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if debounce.take(Instant::now()) {
                    request_scan(&scan_tx, ScanSource::Watcher);
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if is_relevant_event_kind(&event.kind)
                    && event.paths.iter().any(|p| is_watched_definition(p, &services_dir))
                {
                    debounce.record(Instant::now());
                }
            }
        }
    }

    Ok(())
}

async fn scan_processor_task(
    pipeline: Arc<Pipeline>,
    mut scan_rx: mpsc::Receiver<ScanSource>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            source = scan_rx.recv() => {
                let Some(source) = source else { break };
                let started = Instant::now();
                let pipeline = pipeline.clone();
                let result = tokio::task::spawn_blocking(move || pipeline.scan_once())
                    .await
                    .map_err(|e| join_err("scan", e))?;

                match result {
                    Ok(summary) => {
                        let changed = summary.new + summary.modified + summary.retried + summary.removed;
                        if changed > 0 || !summary.failures.is_empty() {
                            tracing::info!(
                                source = source.label(),
                                new = summary.new,
                                modified = summary.modified,
                                retried = summary.retried,
                                removed = summary.removed,
                                failed = summary.failures.len(),
                                duration_ms = started.elapsed().as_millis() as u64,
                                "scan completed",
                            );
                        }
                    }
                    // The next request retries.
                    Err(err) => tracing::error!(source = source.label(), error = %err, "scan failed"),
                }
            }
        }
    }

    Ok(())
}

async fn scan_ticker_task(
    every: Duration,
    scan_tx: mpsc::Sender<ScanSource>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // the startup scan is already queued

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                request_scan(&scan_tx, ScanSource::Ticker);
            }
        }
    }
    Ok(())
}

async fn cleaner_task(
    pipeline: Arc<Pipeline>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let pipeline = pipeline.clone();
                let result = tokio::task::spawn_blocking(move || pipeline.clean_once())
                    .await
                    .map_err(|e| join_err("clean", e))?;
                if let Err(err) = result {
                    tracing::error!(error = %err, "cleaner pass failed");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Queue a scan unless one is already pending. Returns whether it was queued.
fn request_scan(scan_tx: &mpsc::Sender<ScanSource>, source: ScanSource) -> bool {
    match scan_tx.try_send(source) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!(source = source.label(), "scan already pending");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_watched_definition(path: &Path, services_dir: &Path) -> bool {
    path.parent() == Some(services_dir) && scanner::is_definition(path)
}

/// Trailing-edge debounce: fires once events have been quiet for `window`.
///
/// Saving a file usually emits a create followed by one or more modify
/// events; scanning on the first one could read a half-written file.
#[derive(Debug)]
struct Debounce {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debounce {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    fn record(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|at| at + self.window)
    }

    /// Whether the quiet window has elapsed; clears the pending event if so.
    fn take(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }
}

fn join_err(task: &'static str, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::Join {
        task,
        detail: err.to_string(),
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(join_err(task, err)),
    }
}

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info`
/// filter; `WARDEN_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("WARDEN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let mut debounce = Debounce::new(Duration::from_millis(100));
        let mut scans = 0usize;

        for _ in 0..5 {
            debounce.record(Instant::now());
            advance(Duration::from_millis(10)).await;
            if debounce.take(Instant::now()) {
                scans += 1;
            }
        }
        assert_eq!(scans, 0, "no scan while saves keep arriving");

        advance(Duration::from_millis(150)).await;
        assert!(debounce.take(Instant::now()));
        assert!(!debounce.take(Instant::now()), "fires once per burst");
        assert_eq!(debounce.deadline(), None);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_window_restarts_on_each_event() {
        let mut debounce = Debounce::new(Duration::from_millis(500));
        debounce.record(Instant::now());
        advance(Duration::from_millis(400)).await;
        debounce.record(Instant::now());
        advance(Duration::from_millis(400)).await;
        assert!(!debounce.take(Instant::now()));
        advance(Duration::from_millis(100)).await;
        assert!(debounce.take(Instant::now()));
    }

    #[tokio::test]
    async fn pending_scan_absorbs_further_requests() {
        let (tx, mut rx) = mpsc::channel::<ScanSource>(1);
        assert!(request_scan(&tx, ScanSource::Watcher));
        assert!(!request_scan(&tx, ScanSource::Ticker));
        assert_eq!(rx.recv().await, Some(ScanSource::Watcher));
        assert!(request_scan(&tx, ScanSource::Ticker));
    }

    #[test]
    fn removal_events_are_relevant() {
        assert!(is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_relevant_event_kind(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }

    #[test]
    fn only_top_level_toml_files_are_watched() {
        let dir = Path::new("/srv/services");
        assert!(is_watched_definition(Path::new("/srv/services/a.toml"), dir));
        assert!(!is_watched_definition(Path::new("/srv/services/a.toml.swp"), dir));
        assert!(!is_watched_definition(Path::new("/srv/services/sub/a.toml"), dir));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn panicked_task_surfaces_as_join_error() {
        let handle = tokio::spawn(async {
            if true {
                panic!("scan worker blew up");
            }
            Ok::<(), DaemonError>(())
        });
        let err = handle_join("scan processor", handle.await).unwrap_err();
        assert!(
            matches!(err, DaemonError::Join { task: "scan processor", .. }),
            "got: {err}"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn task_error_passes_through_join() {
        let handle = tokio::spawn(async {
            Err::<(), _>(io_err("/srv/services", std::io::ErrorKind::NotFound.into()))
        });
        let err = handle_join("watcher", handle.await).unwrap_err();
        assert!(matches!(err, DaemonError::Io { .. }), "got: {err}");
    }
}
