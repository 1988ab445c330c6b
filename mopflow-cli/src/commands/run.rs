//! Run command handler
//!
//! Loads a batch file, reconciles it against the task store and submits the
//! unfinished tasks. Optionally waits for them and serves the status API
//! while the run is in progress.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;
use mopflow_core::domain::summary::{Summary, SummaryCondition};
use mopflow_core::domain::task::TaskId;
use mopflow_orchestrator::api;
use mopflow_orchestrator::batch::BatchConfig;
use mopflow_orchestrator::collaborator::{CommandScheduler, TemplateScriptProvider};
use mopflow_orchestrator::service::{Controller, StatusReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, open_store};

#[derive(Args)]
pub struct RunArgs {
    /// Batch file (TOML)
    batch: PathBuf,

    /// Wait until every task is completed or failed
    #[arg(long)]
    wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Maximum concurrent submissions
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,

    /// Seconds between polls while waiting
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Job script template (defaults to the built-in PBS template)
    #[arg(long)]
    template: Option<PathBuf>,

    /// Serve the status API on this address during the run
    #[arg(long)]
    serve: Option<String>,
}

pub async fn handle_run(args: RunArgs, config: &Config) -> Result<()> {
    let batch = BatchConfig::load(&args.batch)?;

    let mut orchestrator = config.orchestrator();
    batch.apply_to(&mut orchestrator);
    config.apply_overrides(&mut orchestrator);
    if args.wait {
        orchestrator.wait = true;
    }
    if let Some(secs) = args.deadline {
        orchestrator.deadline = Some(Duration::from_secs(secs));
    }
    if let Some(concurrency) = args.concurrency {
        orchestrator.concurrency = concurrency;
    }
    if let Some(secs) = args.poll_interval {
        orchestrator.poll_interval = Duration::from_secs(secs);
    }
    orchestrator.validate()?;

    // Jobs run elsewhere and need an absolute path back to the database
    let db_path = std::path::absolute(&orchestrator.database_path)
        .context("Cannot resolve the task database path")?;

    let template = args.template.or_else(|| batch.scheduler.template.clone());
    let provider = match template {
        Some(path) => TemplateScriptProvider::from_file(&path, &db_path)
            .with_context(|| format!("Cannot read job template {}", path.display()))?,
        None => TemplateScriptProvider::with_default_template(&db_path),
    };
    let scheduler = CommandScheduler::new(batch.scheduler_config())?;
    let store = Arc::new(open_store(&orchestrator).await?);

    if let Some(addr) = args.serve {
        let reader = StatusReader::new(store.clone());
        tokio::spawn(async move {
            if let Err(e) = api::serve(&addr, reader).await {
                tracing::error!("Status API on {} stopped: {}", addr, e);
            }
        });
    }

    let specs = batch.task_specs()?;
    println!(
        "{}",
        format!(
            "Reconciling {} task(s) from {}",
            specs.len(),
            args.batch.display()
        )
        .bold()
    );

    let controller = Controller::new(orchestrator, store, Arc::new(provider), Arc::new(scheduler));
    let summary = controller.run(&specs).await?;

    print_summary(&summary);

    if !summary.failed.is_empty() {
        bail!("{} task(s) failed", summary.failed.len());
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!();
    println!("{}", "Run Summary:".bold());
    println!("  Submitted: {}", summary.submitted.len());
    println!("  Skipped:   {}", summary.skipped.len());
    print_group("Completed", &summary.completed, |s| s.green());
    print_group("Failed", &summary.failed, |s| s.red());
    print_group("Running", &summary.running, |s| s.cyan());
    print_group("Pending", &summary.pending, |s| s.yellow());

    match summary.condition {
        SummaryCondition::AllTerminal => println!("\n{}", "All tasks finished.".green()),
        SummaryCondition::DeadlineExceeded => println!(
            "\n{}",
            "Deadline reached; unfinished jobs keep running.".yellow()
        ),
        SummaryCondition::Submitted => println!(
            "\n{}",
            "Submitted. Re-run the same batch to pick up unfinished work.".dimmed()
        ),
    }
}

fn print_group(label: &str, ids: &[TaskId], paint: impl Fn(&str) -> ColoredString) {
    println!("  {:<10} {}", format!("{label}:"), ids.len());
    for id in ids {
        println!("    {} {}", "▸".dimmed(), paint(id.as_str()));
    }
}
