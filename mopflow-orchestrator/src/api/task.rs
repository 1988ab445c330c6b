//! Task API Handlers
//!
//! Read-only HTTP endpoints over the task store.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use mopflow_core::domain::summary::StatusReport;
use mopflow_core::domain::task::{Task, TaskId, TaskStatus};
use mopflow_core::dto::task::TaskFilter;
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::service::StatusReader;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma separated statuses, e.g. `running,failed`
    pub status: Option<String>,
}

impl ListQuery {
    fn filter(&self) -> Result<TaskFilter, ApiError> {
        let Some(raw) = self.status.as_deref() else {
            return Ok(TaskFilter::all());
        };

        let statuses = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<TaskStatus>().map_err(ApiError::BadRequest))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskFilter::only(statuses))
    }
}

/// GET /tasks
/// List tasks ordered by id, optionally filtered by status
pub async fn list_tasks(
    State(reader): State<StatusReader>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let filter = query.filter()?;
    tracing::debug!("Listing tasks with filter {:?}", filter.statuses);

    Ok(Json(reader.list(&filter).await?))
}

/// GET /tasks/{id}
/// Get a single task
pub async fn get_task(
    State(reader): State<StatusReader>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task_id = TaskId::new(id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::debug!("Getting task: {}", task_id);

    Ok(Json(reader.get(&task_id).await?))
}

/// GET /summary
/// Counts per status and elapsed time of running tasks
pub async fn get_summary(State(reader): State<StatusReader>) -> ApiResult<Json<StatusReport>> {
    Ok(Json(reader.summary().await?))
}
