//! SQLite task store.

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use sync_types::{SyncTask, TaskId};

use crate::{StoreError, TaskStore};

/// SQLite-based task store.
///
/// Each task is one row. The full record is kept as a MessagePack blob;
/// kind, status, priority and timestamps are duplicated into columns for
/// ordering and inspection with plain SQL.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (or create) a database file.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        tracing::debug!("Opened task store at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the underlying pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_tasks (
                task_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                record BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_tasks_order \
             ON sync_tasks(priority DESC, created_at ASC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, task: &SyncTask) -> Result<(), StoreError> {
        let record = task.to_bytes()?;

        sqlx::query(
            r#"
            INSERT INTO sync_tasks (task_id, kind, status, priority, created_at, updated_at, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(task_id) DO UPDATE SET
                status = excluded.status,
                priority = excluded.priority,
                updated_at = excluded.updated_at,
                record = excluded.record
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.kind().as_str())
        .bind(task.status.as_str())
        .bind(task.priority.rank())
        .bind(task.created_at as i64)
        .bind(task.updated_at as i64)
        .bind(record)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, id: &TaskId) -> Result<Option<SyncTask>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT task_id, record FROM sync_tasks WHERE task_id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> Result<Vec<SyncTask>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT task_id, record
            FROM sync_tasks
            ORDER BY priority DESC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let task_id = row.task_id.clone();
            match SyncTask::try_from(row) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!("Skipping unreadable task {}: {}", task_id, e),
            }
        }
        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sync_tasks WHERE task_id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    record: Vec<u8>,
}

impl TryFrom<TaskRow> for SyncTask {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let task = SyncTask::from_bytes(&row.record)?;
        if task.id.to_string() != row.task_id {
            return Err(StoreError::Corrupt {
                task_id: row.task_id,
                reason: format!("record holds task {}", task.id),
            });
        }
        Ok(task)
    }
}
