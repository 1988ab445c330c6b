//! Task Repository
//!
//! SQLite-backed task store. Every write is a single statement, so SQLite
//! applies it atomically and serializes concurrent writers, including worker
//! processes that open the same database file.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mopflow_core::domain::task::{FailureReason, Metadata, Task, TaskId, TaskStatus};
use mopflow_core::dto::task::TaskFilter;
use mopflow_core::error::StoreError;
use mopflow_core::store::TaskStore;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::db;

const COLUMNS: &str = "task_id, status, scheduler_handle, created_at, started_at, ended_at, \
                       error_message, failure_reason, metadata, attempts, revision";

const INSERT: &str = r#"
    INSERT INTO tasks (task_id, status, scheduler_handle, created_at, started_at, ended_at,
                       error_message, failure_reason, metadata, attempts, revision, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
"#;

const ON_CONFLICT_UPDATE: &str = r#"
    ON CONFLICT(task_id) DO UPDATE SET
        status = excluded.status,
        scheduler_handle = excluded.scheduler_handle,
        started_at = excluded.started_at,
        ended_at = excluded.ended_at,
        error_message = excluded.error_message,
        failure_reason = excluded.failure_reason,
        metadata = excluded.metadata,
        attempts = excluded.attempts,
        revision = tasks.revision + 1,
        updated_at = excluded.updated_at
"#;

/// Task store over a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteTaskStore {
    /// Opens (and migrates) the database at `path`
    ///
    /// `timeout` bounds every store operation, including the wait for
    /// SQLite's write lock.
    pub async fn open(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let pool = db::create_pool(path, timeout)
            .await
            .map_err(|e| unavailable("open", e))?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| unavailable("migrate", e))?;

        tracing::debug!("Task store opened at {}", path.display());

        Ok(Self { pool, timeout })
    }

    /// Runs a database call under the store timeout
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| unavailable(op, e)),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn write(
        &self,
        task: Task,
        sql: String,
        expected: Option<u64>,
    ) -> Result<Option<Task>, StoreError> {
        task.validate().map_err(StoreError::InvalidRecord)?;
        let row = TaskRow::encode(&task)?;
        let now = encode_ts(Utc::now());

        let mut query = sqlx::query_as::<_, (i64, String)>(&sql)
            .bind(&row.task_id)
            .bind(&row.status)
            .bind(&row.scheduler_handle)
            .bind(&row.created_at)
            .bind(&row.started_at)
            .bind(&row.ended_at)
            .bind(&row.error_message)
            .bind(&row.failure_reason)
            .bind(&row.metadata)
            .bind(row.attempts)
            .bind(now);
        if let Some(expected) = expected {
            query = query.bind(expected as i64);
        }

        let stored = self.bounded("upsert", query.fetch_optional(&self.pool)).await?;

        stored
            .map(|(revision, created_at)| -> Result<Task, StoreError> {
                let mut task = task;
                task.revision = revision as u64;
                task.created_at = decode_ts(&created_at)?;
                Ok(task)
            })
            .transpose()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE task_id = ?1");
        let row = self
            .bounded(
                "get",
                sqlx::query_as::<_, TaskRow>(&sql)
                    .bind(task_id.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn upsert(&self, task: Task) -> Result<Task, StoreError> {
        let task_id = task.task_id.clone();
        let sql = format!("{INSERT} {ON_CONFLICT_UPDATE} RETURNING revision, created_at");

        self.write(task, sql, None)
            .await?
            .ok_or_else(|| StoreError::Unavailable(format!("upsert of {task_id} returned no row")))
    }

    async fn upsert_if_unchanged(&self, task: Task) -> Result<Option<Task>, StoreError> {
        if task.revision == 0 {
            let sql =
                format!("{INSERT} ON CONFLICT(task_id) DO NOTHING RETURNING revision, created_at");
            return self.write(task, sql, None).await;
        }

        let expected = task.revision;
        let sql = format!(
            "{INSERT} {ON_CONFLICT_UPDATE} WHERE tasks.revision = ?12 RETURNING revision, created_at"
        );
        self.write(task, sql, Some(expected)).await
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM tasks"));

        if !filter.statuses.is_empty() {
            builder.push(" WHERE status IN (");
            let mut separated = builder.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY task_id ASC");

        let rows = self
            .bounded(
                "list",
                builder.build_query_as::<TaskRow>().fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn reset(&self, task_id: &TaskId) -> Result<Task, StoreError> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'pending', scheduler_handle = NULL, started_at = NULL, ended_at = NULL,
                error_message = NULL, failure_reason = NULL,
                revision = revision + 1, updated_at = ?1
            WHERE task_id = ?2
            RETURNING {COLUMNS}
            "#
        );

        let row = self
            .bounded(
                "reset",
                sqlx::query_as::<_, TaskRow>(&sql)
                    .bind(encode_ts(Utc::now()))
                    .bind(task_id.as_str())
                    .fetch_optional(&self.pool),
            )
            .await?;

        match row {
            Some(row) => {
                let task = Task::try_from(row)?;
                tracing::info!("Task {} reset to pending", task.task_id);
                Ok(task)
            }
            None => Err(StoreError::NotFound(task_id.to_string())),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn unavailable(op: &str, err: sqlx::Error) -> StoreError {
    tracing::error!("Task store {} failed: {:?}", op, err);
    StoreError::Unavailable(format!("{op}: {err}"))
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("bad timestamp '{s}': {e}")))
}

fn decode_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(decode_ts).transpose()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    status: String,
    scheduler_handle: Option<String>,
    created_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    error_message: Option<String>,
    failure_reason: Option<String>,
    metadata: String,
    attempts: i64,
    revision: i64,
}

impl TaskRow {
    fn encode(task: &Task) -> Result<Self, StoreError> {
        let metadata = serde_json::to_string(&task.metadata)
            .map_err(|e| StoreError::InvalidRecord(format!("metadata of {}: {e}", task.task_id)))?;

        Ok(Self {
            task_id: task.task_id.to_string(),
            status: task.status.as_str().to_string(),
            scheduler_handle: task.scheduler_handle.clone(),
            created_at: encode_ts(task.created_at),
            started_at: task.started_at.map(encode_ts),
            ended_at: task.ended_at.map(encode_ts),
            error_message: task.error_message.clone(),
            failure_reason: task.failure_reason.map(|r| r.as_str().to_string()),
            metadata,
            attempts: i64::from(task.attempts),
            revision: task.revision as i64,
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let task_id =
            TaskId::new(row.task_id).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        let status: TaskStatus = row.status.parse().map_err(StoreError::InvalidRecord)?;
        let failure_reason = row
            .failure_reason
            .as_deref()
            .map(str::parse::<FailureReason>)
            .transpose()
            .map_err(StoreError::InvalidRecord)?;
        let metadata: Metadata = serde_json::from_str(&row.metadata)
            .map_err(|e| StoreError::InvalidRecord(format!("metadata of {task_id}: {e}")))?;

        Ok(Task {
            status,
            scheduler_handle: row.scheduler_handle,
            created_at: decode_ts(&row.created_at)?,
            started_at: decode_opt_ts(row.started_at)?,
            ended_at: decode_opt_ts(row.ended_at)?,
            error_message: row.error_message,
            failure_reason,
            metadata,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            revision: row.revision as u64,
            task_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, SqliteTaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::open(&dir.path().join("tasks.db"), Duration::from_secs(5))
            .await
            .unwrap();
        (dir, store)
    }

    fn pending(id: &str) -> Task {
        let mut metadata = Metadata::new();
        metadata.insert("experiment_id".into(), "historical".into());
        Task::pending(TaskId::new(id).unwrap(), metadata, Utc::now())
    }

    #[tokio::test]
    async fn test_upsert_then_get_returns_written_record() {
        let (_dir, store) = open_store().await;

        let mut task = pending("historical:Amon.tas");
        task.mark_submitted("1234567.gadi-pbs".into(), Utc::now()).unwrap();

        let stored = store.upsert(task.clone()).await.unwrap();
        assert_eq!(stored.revision, 1);

        let fetched = store.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert_eq!(fetched.scheduler_handle.as_deref(), Some("1234567.gadi-pbs"));
        assert_eq!(fetched.started_at, task.started_at);
        assert_eq!(fetched.metadata, task.metadata);
    }

    #[tokio::test]
    async fn test_upsert_replaces_single_record() {
        let (_dir, store) = open_store().await;

        let task = store.upsert(pending("Amon.tas")).await.unwrap();
        let mut task = task;
        task.mark_submitted("1".into(), Utc::now()).unwrap();
        let task = store.upsert(task).await.unwrap();
        assert_eq!(task.revision, 2);

        let all = store.list(&TaskFilter::all()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_dir, store) = open_store().await;
        let id = TaskId::new("Omon.tos").unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_record_is_rejected() {
        let (_dir, store) = open_store().await;

        let mut task = pending("Amon.tas");
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());

        let err = store.upsert(task.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert!(store.get(&task.task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_write_detects_concurrent_update() {
        let (_dir, store) = open_store().await;

        let created = store
            .upsert_if_unchanged(pending("Amon.tas"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.revision, 1);

        // A second create loses
        assert!(
            store
                .upsert_if_unchanged(pending("Amon.tas"))
                .await
                .unwrap()
                .is_none()
        );

        // A worker completes the task behind the controller's back
        let mut worker_copy = created.clone();
        worker_copy.mark_completed(Utc::now()).unwrap();
        store.upsert_if_unchanged(worker_copy).await.unwrap().unwrap();

        // The controller's stale copy no longer applies
        let mut stale = created;
        stale.mark_submitted("1".into(), Utc::now()).unwrap();
        assert!(store.upsert_if_unchanged(stale).await.unwrap().is_none());

        let current = store.get(&TaskId::new("Amon.tas").unwrap()).await.unwrap().unwrap();
        assert_eq!(current.status, TaskStatus::Completed);
        assert_eq!(current.revision, 2);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_by_id() {
        let (_dir, store) = open_store().await;

        for id in ["c", "a", "b"] {
            store.upsert(pending(id)).await.unwrap();
        }
        let mut failed = pending("d");
        failed
            .mark_submit_failed(FailureReason::Render, "no pattern".into(), Utc::now())
            .unwrap();
        store.upsert(failed).await.unwrap();

        let all = store.list(&TaskFilter::all()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let failed = store
            .list(&TaskFilter::only([TaskStatus::Failed]))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_reason, Some(FailureReason::Render));

        let none = store
            .list(&TaskFilter::only([TaskStatus::Running, TaskStatus::Completed]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (_dir, store) = open_store().await;

        let mut task = pending("Amon.tas");
        task.mark_submitted("1".into(), Utc::now()).unwrap();
        task.mark_failed(FailureReason::Worker, "segfault".into(), Utc::now()).unwrap();
        store.upsert(task.clone()).await.unwrap();

        let reset = store.reset(&task.task_id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert!(reset.scheduler_handle.is_none());
        assert!(reset.started_at.is_none());
        assert!(reset.ended_at.is_none());
        assert!(reset.error_message.is_none());
        assert!(reset.failure_reason.is_none());
        assert_eq!(reset.metadata, task.metadata);
        assert!(reset.validate().is_ok());

        let missing = store.reset(&TaskId::new("nope").unwrap()).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_pool_reports_unavailable() {
        let (_dir, store) = open_store().await;
        store.pool.close().await;

        let err = store.get(&TaskId::new("Amon.tas").unwrap()).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_second_handle_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let controller = SqliteTaskStore::open(&path, Duration::from_secs(5)).await.unwrap();
        let worker = SqliteTaskStore::open(&path, Duration::from_secs(5)).await.unwrap();

        let mut task = pending("Amon.tas");
        task.mark_submitted("42".into(), Utc::now()).unwrap();
        controller.upsert(task.clone()).await.unwrap();

        let mut seen = worker.get(&task.task_id).await.unwrap().unwrap();
        seen.mark_completed(Utc::now()).unwrap();
        worker.upsert(seen).await.unwrap();

        let done = controller.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
    }
}
