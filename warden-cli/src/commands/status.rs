//! `warden status`: what the store currently believes.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use warden_core::{FileId, Service, ServiceState, Settings, Store, StoreSummary};

use super::print_json;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Include disowned services still waiting for the cleaner.
    #[arg(long)]
    pub all: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let store = Store::open(&settings.database)
            .with_context(|| format!("failed to open {}", settings.database.display()))?;
        store.ensure_schema().context("failed to create store schema")?;

        let report = build_report(&store, self.all)?;
        if self.json {
            return print_json(&report);
        }
        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    database: PathBuf,
    summary: StoreSummary,
    services: Vec<ServiceStatus>,
}

#[derive(Debug, Serialize)]
struct ServiceStatus {
    id: i64,
    /// `None` for disowned rows.
    file: Option<String>,
    name: String,
    state: ServiceState,
    artifacts: Vec<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "id")]
    id: i64,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "service")]
    name: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "artifacts")]
    artifacts: String,
    #[tabled(rename = "modified")]
    modified: String,
}

fn build_report(store: &Store, all: bool) -> Result<StatusReport> {
    let summary = store.summary().context("failed to summarize store")?;
    let file_names: HashMap<FileId, String> = store
        .list_files()
        .context("failed to list files")?
        .into_iter()
        .map(|f| (f.id, f.name))
        .collect();

    let mut rows: Vec<Service> = store.live_services().context("failed to list services")?;
    if all {
        rows.extend(store.orphan_services().context("failed to list services")?);
    }

    let mut services = Vec::with_capacity(rows.len());
    for service in rows {
        let artifacts = store
            .artifacts_of(service.id)
            .with_context(|| format!("failed to list artifacts of service {}", service.id))?
            .into_iter()
            .map(|a| a.kind.to_string())
            .collect();
        services.push(ServiceStatus {
            id: service.id.0,
            file: service.file_id.and_then(|id| file_names.get(&id).cloned()),
            name: service.name,
            state: service.state,
            artifacts,
            last_modified: service.last_modified,
        });
    }

    Ok(StatusReport {
        database: store.path().to_path_buf(),
        summary,
        services,
    })
}

fn print_table(report: StatusReport) {
    let s = &report.summary;
    println!(
        "Warden v{} | {} files ({} pending) | {} services | {} artifacts",
        env!("CARGO_PKG_VERSION"),
        s.files,
        s.files_pending,
        s.live_services,
        s.artifacts,
    );
    println!("store: {}", report.database.display());
    if s.orphan_services + s.orphan_artifacts > 0 {
        println!(
            "{} {} services, {} artifacts waiting for `warden clean`",
            "■".magenta().bold(),
            s.orphan_services,
            s.orphan_artifacts,
        );
    }

    if report.services.is_empty() {
        println!("No services stored.");
        return;
    }

    let now = Utc::now();
    let rows: Vec<ServiceRow> = report
        .services
        .into_iter()
        .map(|svc| ServiceRow {
            id: svc.id,
            file: svc.file.unwrap_or_else(|| "(orphan)".to_string()),
            name: svc.name,
            state: state_label(svc.state),
            artifacts: if svc.artifacts.is_empty() {
                "-".to_string()
            } else {
                svc.artifacts.join(", ")
            },
            modified: format_age(now, svc.last_modified),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn state_label(state: ServiceState) -> String {
    let label = state.as_str();
    match state {
        ServiceState::Configured => label.green().to_string(),
        ServiceState::NotConfigured => label.bright_black().to_string(),
        ServiceState::ToConfigureHttps | ServiceState::ToDisableHttp => {
            label.yellow().to_string()
        }
    }
}

fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "0s ago");
        assert_eq!(format_age(now, now - Duration::minutes(5)), "5m ago");
        assert_eq!(format_age(now, now - Duration::hours(2)), "2h ago");
        assert_eq!(format_age(now, now - Duration::days(3)), "3d ago");
        assert_eq!(format_age(now, now + Duration::seconds(10)), "0s ago");
    }
}
