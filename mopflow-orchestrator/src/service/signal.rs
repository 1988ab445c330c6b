//! Worker signals
//!
//! Jobs report their own progress straight into the task store, from a
//! process other than the controller. Each signal re-reads the record and
//! writes it back conditionally, retrying when another writer got there
//! first.

use chrono::Utc;
use mopflow_core::domain::task::{FailureReason, Task, TaskId, TaskStatus};
use mopflow_core::error::{SignalError, StoreError, TransitionError};
use mopflow_core::store::TaskStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct WorkerSignals {
    store: Arc<dyn TaskStore>,
}

impl WorkerSignals {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// The job started executing under `handle`
    pub async fn started(
        &self,
        task_id: &TaskId,
        handle: impl Into<String>,
    ) -> Result<Task, SignalError> {
        let handle = handle.into();
        let task = self
            .apply(task_id, |task| {
                task.mark_started(handle.clone(), Utc::now())
                    .map(|()| true)
            })
            .await?;
        info!("Task {} started as job {}", task_id, handle);
        Ok(task)
    }

    /// The job finished successfully; repeating the signal is harmless
    pub async fn completed(&self, task_id: &TaskId) -> Result<Task, SignalError> {
        let task = self
            .apply(task_id, |task| {
                if task.status == TaskStatus::Completed {
                    return Ok(false);
                }
                task.mark_completed(Utc::now()).map(|()| true)
            })
            .await?;
        info!("Task {} completed", task_id);
        Ok(task)
    }

    /// The job failed with `message`
    pub async fn failed(
        &self,
        task_id: &TaskId,
        message: impl Into<String>,
    ) -> Result<Task, SignalError> {
        let message = message.into();
        let task = self
            .apply(task_id, |task| {
                task.mark_failed(FailureReason::Worker, message.clone(), Utc::now())
                    .map(|()| true)
            })
            .await?;
        warn!("Task {} failed: {}", task_id, message);
        Ok(task)
    }

    /// Read-modify-write loop; `change` returns false when nothing needs writing
    async fn apply<F>(&self, task_id: &TaskId, mut change: F) -> Result<Task, SignalError>
    where
        F: FnMut(&mut Task) -> Result<bool, TransitionError> + Send,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut task = self
                .store
                .get(task_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

            if !change(&mut task)? {
                return Ok(task);
            }

            if let Some(stored) = self.store.upsert_if_unchanged(task).await? {
                return Ok(stored);
            }
            debug!("Task {} changed during signal (attempt {})", task_id, attempt);
        }

        Err(SignalError::Contended(task_id.to_string()))
    }
}
