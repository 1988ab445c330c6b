//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod reset;
mod run;
mod status;
mod task;

pub use reset::ResetArgs;
pub use run::RunArgs;
pub use task::TaskCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile a batch file and submit unfinished tasks
    Run(RunArgs),
    /// List tasks
    List {
        /// Only show these statuses (comma separated)
        #[arg(long, value_delimiter = ',')]
        status: Vec<String>,
    },
    /// Show one task
    Get {
        /// Task id, e.g. historical:Amon.tas
        id: String,
    },
    /// Counts per status and running tasks
    Summary,
    /// Return tasks to pending so the next run resubmits them
    Reset(ResetArgs),
    /// Progress reports from inside a batch job
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run(args, config).await,
        Commands::List { status } => status::list_tasks(config, &status).await,
        Commands::Get { id } => status::get_task(config, &id).await,
        Commands::Summary => status::show_summary(config).await,
        Commands::Reset(args) => reset::handle_reset(args, config).await,
        Commands::Task { command } => task::handle_task_command(command, config).await,
    }
}
