//! Jobs repository
//!
//! Durable storage of job records, keyed by job ID:
//! - Inserting newly queued jobs
//! - Overwriting a job record on every status change
//! - Loading every record to rehydrate the queue

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minihpc_core::domain::job::{Job, JobStatus};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::db;

/// Errors reported by a [`JobStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} has an invalid stored record: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository trait for job persistence
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Durably creates a job record
    ///
    /// Fails with [`StoreError::Duplicate`] if the ID is already present.
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Overwrites the full record of an existing job
    ///
    /// Fails with [`StoreError::NotFound`] if the ID is unknown.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Returns every persisted job in storage order
    async fn load_all(&self) -> Result<Vec<Job>, StoreError>;
}

/// SQLite implementation of JobStore
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database at `database_url` and applies migrations
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = db::create_pool(database_url).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Find a job by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, name, command, status, cpu, memory, image, log,
                   error, exit_code, created_at, started_at, completed_at
            FROM jobs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, name, command, status, cpu, memory, image, log,
                              error, exit_code, created_at, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.command)
        .bind(job.status.as_str())
        .bind(i64::from(job.cpu))
        .bind(memory_to_db(job)?)
        .bind(&job.image)
        .bind(&job.log)
        .bind(&job.error)
        .bind(job.exit_code)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = ?, command = ?, status = ?, cpu = ?, memory = ?, image = ?,
                log = ?, error = ?, exit_code = ?, created_at = ?, started_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.name)
        .bind(&job.command)
        .bind(job.status.as_str())
        .bind(i64::from(job.cpu))
        .bind(memory_to_db(job)?)
        .bind(&job.image)
        .bind(&job.log)
        .bind(&job.error)
        .bind(job.exit_code)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id));
        }

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, name, command, status, cpu, memory, image, log,
                   error, exit_code, created_at, started_at, completed_at
            FROM jobs
            ORDER BY rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

fn memory_to_db(job: &Job) -> Result<i64, StoreError> {
    i64::try_from(job.memory).map_err(|_| StoreError::Corrupt {
        id: job.id.to_string(),
        reason: format!("memory {} does not fit in a signed 64-bit column", job.memory),
    })
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    command: String,
    status: String,
    cpu: i64,
    memory: i64,
    image: String,
    log: String,
    error: Option<String>,
    exit_code: Option<i64>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        let id = Uuid::parse_str(&row.id).map_err(|e| corrupt(e.to_string()))?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let cpu = u32::try_from(row.cpu).map_err(|_| corrupt(format!("cpu {}", row.cpu)))?;
        let memory =
            u64::try_from(row.memory).map_err(|_| corrupt(format!("memory {}", row.memory)))?;

        Ok(Job {
            id,
            name: row.name,
            command: row.command,
            status,
            cpu,
            memory,
            image: row.image,
            log: row.log,
            error: row.error,
            exit_code: row.exit_code,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minihpc_core::dto::job::CreateJob;

    async fn store() -> SqliteJobStore {
        SqliteJobStore::connect("sqlite::memory:").await.unwrap()
    }

    fn job(command: &str) -> Job {
        Job::new(CreateJob {
            name: None,
            image: "alpine".to_string(),
            command: command.to_string(),
            cpu: 2,
            memory: 256 * 1024 * 1024,
        })
    }

    #[tokio::test]
    async fn test_insert_and_load_preserves_order() {
        let store = store().await;
        let jobs = vec![job("echo a"), job("echo b"), job("echo c")];
        for j in &jobs {
            store.insert(j).await.unwrap();
        }

        let loaded = store.load_all().await.unwrap();
        let ids: Vec<Uuid> = loaded.iter().map(|j| j.id).collect();
        let expected: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, expected);
        assert_eq!(loaded[0].command, "echo a");
        assert_eq!(loaded[0].cpu, 2);
        assert_eq!(loaded[0].memory, 256 * 1024 * 1024);
        assert_eq!(loaded[0].status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails() {
        let store = store().await;
        let j = job("echo a");
        store.insert(&j).await.unwrap();

        let err = store.insert(&j).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == j.id));
    }

    #[tokio::test]
    async fn test_update_overwrites_record() {
        let store = store().await;
        let mut j = job("echo hi");
        store.insert(&j).await.unwrap();

        j.mark_running().unwrap();
        store.update(&j).await.unwrap();
        j.mark_complete("hi\n".to_string(), Some(0)).unwrap();
        store.update(&j).await.unwrap();

        let stored = store.find_by_id(j.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Complete);
        assert_eq!(stored.log, "hi\n");
        assert_eq!(stored.exit_code, Some(0));
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_job_fails() {
        let store = store().await;
        let j = job("echo a");

        let err = store.update(&j).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == j.id));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id_missing() {
        let store = store().await;
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_job_round_trip() {
        let store = store().await;
        let mut j = job("exit 1");
        store.insert(&j).await.unwrap();
        j.mark_running().unwrap();
        j.mark_failed("image pull failed").unwrap();
        store.update(&j).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, JobStatus::Failed);
        assert_eq!(loaded[0].error.as_deref(), Some("image pull failed"));
        assert_eq!(loaded[0].log, "");
    }
}
