//! Read-only queries for dashboards and the CLI

use chrono::Utc;
use mopflow_core::domain::summary::StatusReport;
use mopflow_core::domain::task::{Task, TaskId, TaskStatus};
use mopflow_core::dto::task::TaskFilter;
use mopflow_core::error::StoreError;
use mopflow_core::store::TaskStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct StatusReader {
    store: Arc<dyn TaskStore>,
}

impl StatusReader {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Fetch a single task, `NotFound` when it was never seen
    pub async fn get(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    /// Tasks matching the filter, ordered by task id
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.store.list(filter).await
    }

    /// Counts per status and elapsed time of every running task
    pub async fn summary(&self) -> Result<StatusReport, StoreError> {
        let tasks = self.store.list(&TaskFilter::all()).await?;
        Ok(StatusReport::from_tasks(&tasks, Utc::now()))
    }

    /// Round-trip the store with a cheap query; returns the running count
    pub async fn ping(&self) -> Result<usize, StoreError> {
        let running = self.store.list(&TaskFilter::only([TaskStatus::Running])).await?;
        Ok(running.len())
    }
}
