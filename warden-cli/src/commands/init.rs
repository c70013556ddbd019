//! `warden init [--force]`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use warden_core::{settings, Settings, Store};

/// Write default settings and create the watched directories.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing warden.yaml with defaults.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let path = settings::settings_path_at(home);
        let settings = if path.exists() && !self.force {
            println!("· Keeping existing {}", path.display());
            Settings::load_at(home)
                .with_context(|| format!("failed to load {}", path.display()))?
        } else {
            let settings = Settings::defaults(home);
            let saved = settings
                .save_at(home)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✓ Wrote {}", saved.display());
            settings
        };

        settings
            .ensure_dirs()
            .context("failed to create warden directories")?;
        let store = Store::open(&settings.database)
            .with_context(|| format!("failed to open {}", settings.database.display()))?;
        store
            .ensure_schema()
            .context("failed to create store schema")?;

        println!("  services:  {}", settings.services_dir.display());
        println!("  artifacts: {}", settings.artifacts_dir.display());
        println!("  store:     {}", settings.database.display());
        Ok(())
    }
}
