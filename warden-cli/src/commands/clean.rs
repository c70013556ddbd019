//! `warden clean`

use anyhow::{Context, Result};
use clap::Args;

use warden_core::Settings;

use super::{open_pipeline, print_json};

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CleanArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let pipeline = open_pipeline(settings)?;
        let summary = pipeline.clean_once().context("clean pass failed")?;

        if self.json {
            return print_json(&summary);
        }
        if summary.services_deleted + summary.artifacts_deleted == 0
            && summary.services_kept + summary.artifacts_kept == 0
        {
            println!("✓ nothing to clean");
            return Ok(());
        }
        println!(
            "✓ cleaned {} services, {} artifacts",
            summary.services_deleted, summary.artifacts_deleted
        );
        if summary.services_kept + summary.artifacts_kept > 0 {
            println!(
                "  kept {} services, {} artifacts whose files could not be removed",
                summary.services_kept, summary.artifacts_kept
            );
        }
        Ok(())
    }
}
