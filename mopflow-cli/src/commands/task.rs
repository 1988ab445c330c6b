//! Worker command handlers
//!
//! Called from inside a running batch job to record its own progress in the
//! task store. Output stays terse so job logs remain readable.

use anyhow::Result;
use clap::Subcommand;
use mopflow_core::domain::task::TaskId;
use mopflow_orchestrator::service::WorkerSignals;
use std::sync::Arc;

use crate::config::{Config, open_store};

/// Worker subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// The job started
    Start {
        id: String,

        /// Scheduler job id
        #[arg(long, env = "PBS_JOBID")]
        handle: String,
    },
    /// The job finished successfully
    Complete { id: String },
    /// The job failed
    Fail {
        id: String,

        #[arg(long, default_value = "job failed")]
        message: String,
    },
}

pub async fn handle_task_command(command: TaskCommands, config: &Config) -> Result<()> {
    let store = open_store(&config.orchestrator()).await?;
    let signals = WorkerSignals::new(Arc::new(store));

    let task = match command {
        TaskCommands::Start { id, handle } => signals.started(&TaskId::new(id)?, handle).await?,
        TaskCommands::Complete { id } => signals.completed(&TaskId::new(id)?).await?,
        TaskCommands::Fail { id, message } => signals.failed(&TaskId::new(id)?, message).await?,
    };

    println!("{} {}", task.task_id, task.status);
    Ok(())
}
