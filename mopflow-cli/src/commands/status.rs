//! Status command handlers
//!
//! Read-only views over the task store: listing, single task details and
//! the per-status summary.

use anyhow::{Context, Result};
use colored::*;
use mopflow_core::domain::summary::StatusReport;
use mopflow_core::domain::task::{Task, TaskId, TaskStatus};
use mopflow_core::dto::task::TaskFilter;
use mopflow_orchestrator::service::StatusReader;
use std::sync::Arc;

use crate::config::{Config, open_store};

async fn reader(config: &Config) -> Result<StatusReader> {
    let store = open_store(&config.orchestrator()).await?;
    Ok(StatusReader::new(Arc::new(store)))
}

/// List tasks, optionally restricted to some statuses
pub async fn list_tasks(config: &Config, statuses: &[String]) -> Result<()> {
    let statuses = statuses
        .iter()
        .map(|s| s.parse::<TaskStatus>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    let tasks = reader(config).await?.list(&TaskFilter::only(statuses)).await?;

    if tasks.is_empty() {
        println!("{}", "No tasks found.".yellow());
    } else {
        println!("{}", format!("Found {} task(s):", tasks.len()).bold());
        println!();
        for task in &tasks {
            print_task_summary(task);
        }
    }

    Ok(())
}

/// Get and display a single task
pub async fn get_task(config: &Config, id: &str) -> Result<()> {
    let task_id = TaskId::new(id)?;
    let task = reader(config)
        .await?
        .get(&task_id)
        .await
        .with_context(|| format!("Cannot show task {}", task_id))?;

    print_task_details(&task);

    Ok(())
}

/// Counts per status and running tasks
pub async fn show_summary(config: &Config) -> Result<()> {
    let report = reader(config).await?.summary().await?;
    print_report(&report);
    Ok(())
}

fn print_task_summary(task: &Task) {
    println!("  {} {}", "▸".cyan(), task.task_id.to_string().bold());
    println!("    Status:   {}", colorize_status(task.status));
    if let Some(handle) = &task.scheduler_handle {
        println!("    Job:      {}", handle.dimmed());
    }
    if let Some(error) = &task.error_message {
        println!("    Error:    {}", error.red());
    }
    println!();
}

/// Print detailed task information
pub fn print_task_details(task: &Task) {
    println!("{}", "Task Details:".bold());
    println!("  ID:        {}", task.task_id.to_string().cyan());
    println!("  Status:    {}", colorize_status(task.status));
    println!("  Attempts:  {}", task.attempts);
    println!(
        "  Created:   {}",
        task.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(handle) = &task.scheduler_handle {
        println!("  Job:       {}", handle);
    }

    if let Some(started) = task.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(ended) = task.ended_at {
        println!("  Ended:     {}", ended.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(elapsed) = task.elapsed(chrono::Utc::now()) {
        println!("  Duration:  {}s", elapsed.num_seconds());
    }

    if !task.metadata.is_empty() {
        println!("\n{}", "Metadata:".bold());
        for (key, value) in &task.metadata {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(error) = &task.error_message {
        let reason = task
            .failure_reason
            .map(|r| format!(" ({})", r))
            .unwrap_or_default();
        println!("\n{}{}", "Error:".bold(), reason.dimmed());
        println!("{}", error.red());
    }
}

fn print_report(report: &StatusReport) {
    println!("{}", "Task Summary:".bold());
    for status in TaskStatus::ALL {
        let label = format!("{:<10}", status.as_str());
        println!("  {} {}", colorize(status, &label), report.counts.get(status));
    }
    println!("  {:<10} {}", "total", report.counts.total());

    if !report.running.is_empty() {
        println!("\n{}", "Running:".bold());
        for task in &report.running {
            println!(
                "  {} {} {} {}",
                "▸".cyan(),
                task.task_id,
                task.scheduler_handle.as_deref().unwrap_or("-").dimmed(),
                format!("{}s", task.elapsed_secs).dimmed()
            );
        }
    }
}

/// Colorize task status for display
pub fn colorize_status(status: TaskStatus) -> ColoredString {
    colorize(status, status.as_str())
}

fn colorize(status: TaskStatus, status_str: &str) -> ColoredString {
    match status {
        TaskStatus::Pending => status_str.yellow(),
        TaskStatus::Running => status_str.cyan(),
        TaskStatus::Completed => status_str.green(),
        TaskStatus::Failed => status_str.red(),
    }
}
