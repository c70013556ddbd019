//! Warden: turns a directory of service definitions into reverse-proxy
//! listener configuration.
//!
//! # Usage
//!
//! ```text
//! warden [--home <dir>] init [--force]
//! warden [--home <dir>] scan [--json]
//! warden [--home <dir>] clean [--json]
//! warden [--home <dir>] status [--json]
//! warden [--home <dir>] daemon
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{clean::CleanArgs, init::InitArgs, scan::ScanArgs, status::StatusArgs};
use warden_core::{settings, Settings};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Reconcile service definitions into reverse-proxy listener configuration",
    long_about = None,
)]
struct Cli {
    /// Directory holding `.warden/` (default: $WARDEN_HOME, then the user's home).
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write default settings and create the watched directories.
    Init(InitArgs),

    /// Reconcile every definition file once and converge its services.
    Scan(ScanArgs),

    /// Reap disowned services and artifacts once.
    Clean(CleanArgs),

    /// Show stored files, services, and artifacts.
    Status(StatusArgs),

    /// Watch the services directory and reconcile until interrupted.
    Daemon,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = match cli.home {
        Some(home) => home,
        None => settings::home().context("could not determine home directory")?,
    };

    match cli.command {
        Commands::Init(args) => args.run(&home),
        Commands::Scan(args) => args.run(&load_settings(&home)?),
        Commands::Clean(args) => args.run(&load_settings(&home)?),
        Commands::Status(args) => args.run(&load_settings(&home)?),
        Commands::Daemon => commands::daemon::run(load_settings(&home)?),
    }
}

fn load_settings(home: &std::path::Path) -> Result<Settings> {
    Settings::load_at(home).with_context(|| {
        format!(
            "failed to load {}",
            settings::settings_path_at(home).display()
        )
    })
}
