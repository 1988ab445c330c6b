//! Task DTOs

use serde::{Deserialize, Serialize};

use crate::domain::task::{Metadata, Task, TaskId, TaskStatus};

/// A task the caller wants to exist and eventually complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: TaskId,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskSpec {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Status filter for listing tasks; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut statuses: Vec<TaskStatus> = statuses.into_iter().collect();
        statuses.sort();
        statuses.dedup();
        Self { statuses }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&task.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_filter_matching() {
        let task = Task::pending(TaskId::new("Amon.tas").unwrap(), Metadata::new(), Utc::now());

        assert!(TaskFilter::all().matches(&task));
        assert!(TaskFilter::only([TaskStatus::Pending, TaskStatus::Failed]).matches(&task));
        assert!(!TaskFilter::only([TaskStatus::Completed]).matches(&task));
    }

    #[test]
    fn test_filter_dedups_statuses() {
        let filter =
            TaskFilter::only([TaskStatus::Failed, TaskStatus::Pending, TaskStatus::Failed]);
        assert_eq!(filter.statuses, vec![TaskStatus::Pending, TaskStatus::Failed]);
    }
}
