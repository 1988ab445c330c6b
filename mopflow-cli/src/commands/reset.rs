//! Reset command handler

use anyhow::{Result, bail};
use clap::Args;
use colored::*;
use mopflow_core::domain::task::{TaskId, TaskStatus};
use mopflow_core::dto::task::TaskFilter;
use mopflow_core::store::TaskStore;

use crate::config::{Config, open_store};

#[derive(Args)]
pub struct ResetArgs {
    /// Task ids to reset
    ids: Vec<String>,

    /// Reset every failed task
    #[arg(long, conflicts_with = "ids")]
    all_failed: bool,
}

pub async fn handle_reset(args: ResetArgs, config: &Config) -> Result<()> {
    let store = open_store(&config.orchestrator()).await?;

    let ids = if args.all_failed {
        store
            .list(&TaskFilter::only([TaskStatus::Failed]))
            .await?
            .into_iter()
            .map(|task| task.task_id)
            .collect()
    } else {
        args.ids
            .iter()
            .map(TaskId::new)
            .collect::<Result<Vec<_>, _>>()?
    };

    if ids.is_empty() {
        if args.all_failed {
            println!("{}", "No failed tasks to reset.".yellow());
            return Ok(());
        }
        bail!("Nothing to reset: pass task ids or --all-failed");
    }

    for id in &ids {
        let task = store.reset(id).await?;
        tracing::info!("Task {} reset", task.task_id);
        println!("{} {} reset to {}", "✓".green(), task.task_id, "pending".yellow());
    }

    Ok(())
}
