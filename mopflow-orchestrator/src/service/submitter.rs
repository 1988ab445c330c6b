//! Submitter
//!
//! Hands one task to the scheduler: render the job, submit it, then record
//! the handle. Whatever happens after the attempt starts, the task ends up
//! `running` or `failed` in the store, never silently left `pending`.

use chrono::Utc;
use mopflow_core::domain::task::{FailureReason, Task, TaskStatus};
use mopflow_core::error::{StoreError, SubmitError, TransitionError};
use mopflow_core::scheduler::{JobScriptProvider, SchedulerClient};
use mopflow_core::store::TaskStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What became of a job the scheduler accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The task record carries the job handle
    Recorded(String),
    /// Another writer replaced the record first and it does not name this
    /// job, so nothing tracks it
    Superseded { handle: String, status: TaskStatus },
}

impl SubmitOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

#[derive(Clone)]
pub struct Submitter {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn JobScriptProvider>,
    scheduler: Arc<dyn SchedulerClient>,
}

impl Submitter {
    pub fn new(
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn JobScriptProvider>,
        scheduler: Arc<dyn SchedulerClient>,
    ) -> Self {
        Self {
            store,
            provider,
            scheduler,
        }
    }

    /// Submits a pending or failed task
    ///
    /// `task` must be the latest stored snapshot: the final write only
    /// applies if nobody else wrote the record in between. When a worker
    /// reported first (the scheduler started the job before we recorded
    /// it), its state is kept and the job still counts as recorded.
    pub async fn submit(&self, task: Task) -> Result<SubmitOutcome, SubmitError> {
        if !task.status.needs_submission() {
            return Err(TransitionError {
                task_id: task.task_id.to_string(),
                from: task.status,
                to: TaskStatus::Running,
            }
            .into());
        }

        let content = match self.provider.render(&task).await {
            Ok(content) => content,
            Err(e) => {
                self.record_failure(task, FailureReason::Render, e.to_string())
                    .await?;
                return Err(e.into());
            }
        };

        let handle = match self.scheduler.submit(&content).await {
            Ok(handle) => handle,
            Err(e) => {
                self.record_failure(task, FailureReason::Submission, e.to_string())
                    .await?;
                return Err(e.into());
            }
        };

        let task_id = task.task_id.clone();
        let mut running = task;
        running.mark_submitted(handle.clone(), Utc::now())?;

        let written = match self.store.upsert_if_unchanged(running).await {
            Ok(written) => written,
            Err(e) => {
                error!(
                    "Job {} for task {} was submitted but could not be recorded: {}",
                    handle, task_id, e
                );
                return Err(e.into());
            }
        };
        if written.is_some() {
            info!("Task {} submitted as job {}", task_id, handle);
            return Ok(SubmitOutcome::Recorded(handle));
        }

        let current = self
            .store
            .get(&task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

        if current.scheduler_handle.as_deref() == Some(handle.as_str()) {
            debug!("Task {} already reported by job {}", task_id, handle);
            return Ok(SubmitOutcome::Recorded(handle));
        }

        warn!(
            "Job {} is orphaned: task {} changed during submission and is now {} (job {:?})",
            handle, task_id, current.status, current.scheduler_handle
        );
        Ok(SubmitOutcome::Superseded {
            handle,
            status: current.status,
        })
    }

    async fn record_failure(
        &self,
        task: Task,
        reason: FailureReason,
        message: String,
    ) -> Result<(), SubmitError> {
        warn!("Task {} failed before running ({}): {}", task.task_id, reason, message);

        let task_id = task.task_id.clone();
        let mut failed = task;
        failed.mark_submit_failed(reason, message, Utc::now())?;

        if self.store.upsert_if_unchanged(failed).await?.is_none() {
            debug!("Task {} changed concurrently; failure not recorded", task_id);
        }
        Ok(())
    }
}
