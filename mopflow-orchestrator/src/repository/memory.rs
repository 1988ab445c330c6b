//! In-memory task store
//!
//! Same contract as the SQLite store, minus durability. It can be switched
//! into an unavailable state to exercise store-failure paths.

use async_trait::async_trait;
use mopflow_core::domain::task::{Task, TaskId};
use mopflow_core::dto::task::TaskFilter;
use mopflow_core::error::StoreError;
use mopflow_core::store::TaskStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<BTreeMap<TaskId, Task>>,
    unavailable: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        Ok(self.tasks.lock().await.get(task_id).cloned())
    }

    async fn upsert(&self, mut task: Task) -> Result<Task, StoreError> {
        self.check_available()?;
        task.validate().map_err(StoreError::InvalidRecord)?;

        let mut tasks = self.tasks.lock().await;
        match tasks.get(&task.task_id) {
            Some(existing) => {
                task.revision = existing.revision + 1;
                task.created_at = existing.created_at;
            }
            None => task.revision = 1,
        }
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(task)
    }

    async fn upsert_if_unchanged(&self, mut task: Task) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        task.validate().map_err(StoreError::InvalidRecord)?;

        let mut tasks = self.tasks.lock().await;
        let current = tasks.get(&task.task_id).map(|t| (t.revision, t.created_at));
        match current {
            None if task.revision == 0 => task.revision = 1,
            Some((revision, created_at)) if revision == task.revision => {
                task.revision = revision + 1;
                task.created_at = created_at;
            }
            _ => return Ok(None),
        }
        tasks.insert(task.task_id.clone(), task.clone());
        Ok(Some(task))
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.check_available()?;
        Ok(self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn reset(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        self.check_available()?;

        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        task.reset();
        task.revision += 1;
        Ok(task.clone())
    }
}
