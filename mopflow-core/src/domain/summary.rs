//! Run summaries and status reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskId, TaskStatus};

/// How an orchestration run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryCondition {
    /// Submission finished and the caller did not ask to wait
    Submitted,
    /// Every desired task reached a terminal state
    AllTerminal,
    /// The wait deadline passed with tasks still in flight
    DeadlineExceeded,
}

/// Outcome of one orchestration run over a desired task set
///
/// Every list is sorted by task id. `completed`, `failed`, `running` and
/// `pending` partition the desired set as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub running: Vec<TaskId>,
    pub pending: Vec<TaskId>,
    /// Tasks handed to the scheduler during this run
    pub submitted: Vec<TaskId>,
    /// Tasks skipped because they were already completed
    pub skipped: Vec<TaskId>,
    pub condition: SummaryCondition,
}

impl Summary {
    /// Builds a summary from the latest snapshot of each desired task
    pub fn from_snapshot<'a>(
        tasks: impl IntoIterator<Item = &'a Task>,
        submitted: Vec<TaskId>,
        skipped: Vec<TaskId>,
        condition: SummaryCondition,
    ) -> Self {
        let mut summary = Self {
            completed: Vec::new(),
            failed: Vec::new(),
            running: Vec::new(),
            pending: Vec::new(),
            submitted,
            skipped,
            condition,
        };

        for task in tasks {
            let bucket = match task.status {
                TaskStatus::Completed => &mut summary.completed,
                TaskStatus::Failed => &mut summary.failed,
                TaskStatus::Running => &mut summary.running,
                TaskStatus::Pending => &mut summary.pending,
            };
            bucket.push(task.task_id.clone());
        }

        for list in [
            &mut summary.completed,
            &mut summary.failed,
            &mut summary.running,
            &mut summary.pending,
            &mut summary.submitted,
            &mut summary.skipped,
        ] {
            list.sort();
        }

        summary
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.running.len() + self.pending.len()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.condition == SummaryCondition::DeadlineExceeded
    }

    /// Every task finished and none failed
    pub fn is_success(&self) -> bool {
        self.condition == SummaryCondition::AllTerminal && self.failed.is_empty()
    }
}

/// Number of tasks per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}

/// A running task and how long it has been running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub scheduler_handle: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: i64,
}

/// Derived view over the whole store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub counts: StatusCounts,
    pub running: Vec<RunningTask>,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: DateTime<Utc>) -> Self {
        let mut counts = StatusCounts::default();
        let mut running = Vec::new();

        for task in tasks {
            counts.record(task.status);
            if task.status == TaskStatus::Running {
                running.push(RunningTask {
                    task_id: task.task_id.clone(),
                    scheduler_handle: task.scheduler_handle.clone(),
                    started_at: task.started_at,
                    elapsed_secs: task.elapsed(now).map_or(0, |d| d.num_seconds()),
                });
            }
        }

        Self {
            counts,
            running,
            generated_at: now,
        }
    }
}
