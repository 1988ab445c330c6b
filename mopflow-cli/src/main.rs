//! Mopflow CLI
//!
//! Command-line interface for running batches and inspecting the task store.
//! Batch jobs also call back into it to report their own progress.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mopflow")]
#[command(about = "Batch CMORisation orchestrator", long_about = None)]
struct Cli {
    /// Task database (overrides MOPFLOW_DB and the batch file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mopflow_orchestrator=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.db);

    handle_command(cli.command, &config).await
}
