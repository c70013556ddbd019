pub mod clean;
pub mod daemon;
pub mod init;
pub mod scan;
pub mod status;

use anyhow::{Context, Result};
use warden_core::Settings;
use warden_sync::Pipeline;

/// Open the store and writer named by `settings`.
pub(crate) fn open_pipeline(settings: &Settings) -> Result<Pipeline> {
    Pipeline::open(settings).with_context(|| {
        format!(
            "failed to open store {} (run `warden init` first?)",
            settings.database.display()
        )
    })
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}
