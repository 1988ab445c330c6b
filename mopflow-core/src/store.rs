//! Task store trait
//!
//! The store is the single source of truth for task state and the only
//! channel between the controller and the externally running workers.

use async_trait::async_trait;

use crate::domain::task::{Task, TaskId};
use crate::dto::task::TaskFilter;
use crate::error::StoreError;

/// Persistent, crash-durable task record store
///
/// Every write is atomic per task id. Implementations reject records that
/// fail `Task::validate` with `StoreError::InvalidRecord`, and report any
/// storage failure or timeout as `StoreError::Unavailable`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetches a task, `None` when no record exists
    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Creates or replaces the record and returns it as stored
    async fn upsert(&self, task: Task) -> Result<Task, StoreError>;

    /// Writes the record only if the stored revision still equals
    /// `task.revision` (revision 0 means the record must not exist yet)
    ///
    /// Returns the stored record, or `None` when another writer got there
    /// first.
    async fn upsert_if_unchanged(&self, task: Task) -> Result<Option<Task>, StoreError>;

    /// Lists tasks matching the filter, ordered by task id
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Returns the task to pending, clearing timestamps, handle and error
    async fn reset(&self, task_id: &TaskId) -> Result<Task, StoreError>;
}
