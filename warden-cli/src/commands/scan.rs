//! `warden scan`: one reconcile-and-converge pass.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use warden_core::Settings;
use warden_sync::ScanSummary;

use super::{open_pipeline, print_json};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let pipeline = open_pipeline(settings)?;
        let summary = pipeline
            .scan_once()
            .with_context(|| format!("scan of {} failed", pipeline.services_dir().display()))?;

        if self.json {
            return print_json(&summary);
        }
        print_summary(&summary);
        Ok(())
    }
}

fn print_summary(summary: &ScanSummary) {
    let mark = if summary.failures.is_empty() && summary.converge.effects_failed == 0 {
        "✓".green()
    } else {
        "!".yellow()
    };
    println!(
        "{mark} scanned: {} new, {} modified, {} retried, {} unchanged, {} removed",
        summary.new, summary.modified, summary.retried, summary.unchanged, summary.removed,
    );

    let c = &summary.converge;
    println!(
        "  converge: {} services, {} transitions, {} applied, {} failed, {} confirmed",
        c.services, c.transitions, c.effects_applied, c.effects_failed, c.confirmed,
    );
    if c.invalid > 0 {
        println!("  {} stored definitions unreadable", c.invalid.to_string().red());
    }

    for failure in &summary.failures {
        println!(
            "  {}  {}: {}",
            "✗".red(),
            failure.path.display(),
            failure.error
        );
    }
}
