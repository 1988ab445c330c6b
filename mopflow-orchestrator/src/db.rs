use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

/// Opens the task database, creating the file if needed
///
/// The same file is shared by the controller and by every worker process,
/// so writers wait on SQLite's lock for up to `busy_timeout` instead of
/// failing immediately.
pub async fn create_pool(
    database_path: &Path,
    busy_timeout: Duration,
) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(busy_timeout);

    SqlitePoolOptions::new()
        .max_connections(8)
        .acquire_timeout(busy_timeout)
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY NOT NULL,
            status TEXT NOT NULL,
            scheduler_handle TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            ended_at TEXT,
            error_message TEXT,
            failure_reason TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            attempts INTEGER NOT NULL DEFAULT 0,
            revision INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL,
            CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            CHECK (status <> 'running' OR scheduler_handle IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
        .execute(pool)
        .await?;

    tracing::debug!("Database migrations completed successfully");
    Ok(())
}
