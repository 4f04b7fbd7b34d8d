mod cli;
pub mod config;
pub mod db;
pub mod device;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod settings;
pub mod signature;
pub mod telemetry;
mod utils;

use clap::Parser;

pub use cli::{Cli, Command};
pub use config::TelemetryConfig;
pub use pipeline::{CycleReport, PipelineParts, PipelineStatus, TelemetryPipeline};
pub use signature::{compute_client_signature, SignatureInputs};
pub use telemetry::{SyncOutcome, TelemetrySnapshot};
pub use utils::logging::init as init_logging;

pub fn run() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    log::info!("studio-pulse {} starting", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::execute(cli))
}
