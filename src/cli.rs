use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::config::TelemetryConfig;
use crate::device::HostCapabilities;
use crate::models::HostState;
use crate::pipeline::TelemetryPipeline;
use crate::telemetry::events_by_code;

/// Roughly a century; keeps the cutoff well inside chrono's range.
const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Parser, Debug)]
#[command(version, about = "Telemetry core for the studio app", long_about = None)]
pub struct Cli {
    /// Directory holding the telemetry database and settings
    #[arg(long, global = true, default_value = ".studio-pulse")]
    pub data_dir: PathBuf,

    /// JSON file with the host's capability hints
    #[arg(long, global = true)]
    pub host: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Gather, digest, persist and deliver one snapshot
    Run {
        /// JSON file with the app's state containers
        #[arg(long)]
        stores: Option<PathBuf>,

        /// Skip delivery as if the network were down
        #[arg(long)]
        offline: bool,
    },
    /// Print the client signature for this environment
    Signature,
    /// Deliver the latest snapshot and pending error events
    Sync,
    /// Show recently persisted snapshots
    History {
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Show recorded error events, newest first, with a per-code tally
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Summarize local telemetry state
    Status,
    /// Delete delivered error events older than the retention window
    Prune {
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(0..=MAX_RETENTION_DAYS))]
        days: u32,
    },
    /// Turn telemetry on or off for this user
    Consent {
        #[arg(action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        enabled: bool,
    },
}

pub async fn execute(cli: Cli) -> Result<()> {
    let config = TelemetryConfig::from_env();
    let pipeline = TelemetryPipeline::open(&cli.data_dir, config)?;

    if let Some(path) = &cli.host {
        pipeline.set_host_capabilities(read_json::<HostCapabilities>(path)?);
    }

    match cli.command {
        Command::Run { stores, offline } => {
            let stores = match stores {
                Some(path) => read_json::<HostState>(&path)?,
                None => HostState::default(),
            };
            if offline {
                pipeline.network().set_online(false);
            }

            match pipeline.run_startup_cycle(&stores).await {
                Some(report) => print_json(&report)?,
                None => anyhow::bail!("telemetry cycle did not complete; see log for details"),
            }
        }
        Command::Signature => println!("{}", pipeline.client_signature()),
        Command::Sync => print_json(&pipeline.sync().await)?,
        Command::History { limit } => print_json(&pipeline.recent_snapshots(limit).await?)?,
        Command::Events { limit } => {
            let events = pipeline.db().list_error_events(limit).await?;
            print_json(&serde_json::json!({
                "byCode": events_by_code(&events),
                "events": events,
            }))?;
        }
        Command::Status => {
            let db = pipeline.db();
            print_json(&serde_json::json!({
                "telemetryEnabled": pipeline.config().telemetry_enabled
                    && pipeline.settings().telemetry_enabled(),
                "collector": pipeline.config().collector_url,
                "snapshots": db.snapshot_count().await?,
                "pendingEvents": db.unsynced_error_events().await?.len(),
                "lastSyncedAt": db.last_synced_at().await?,
                "clientSignature": pipeline.client_signature(),
            }))?;
        }
        Command::Prune { days } => {
            let removed = pipeline
                .prune_synced_events(chrono::Duration::days(i64::from(days)))
                .await?;
            println!("removed {removed} events");
        }
        Command::Consent { enabled } => {
            pipeline.settings().set_telemetry_enabled(enabled)?;
            println!("telemetry {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
