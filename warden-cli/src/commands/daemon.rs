//! `warden daemon`: foreground watcher until ctrl-c.

use anyhow::{Context, Result};

use warden_core::Settings;

pub fn run(settings: Settings) -> Result<()> {
    warden_daemon::start_blocking(settings).context("daemon exited with error")
}
