//! Repository for the `jobs` table.

use async_trait::async_trait;
use conveyor_core::types::{Id, Timestamp};
use conveyor_core::CoreError;
use sqlx::PgPool;

use super::classify;
use crate::models::job::{Job, JobStatus};

/// Column list shared across `jobs` queries.
const COLUMNS: &str = "\
    id, job_type, priority, payload, attempts, max_attempts, status, error, \
    scheduled_at, started_at, completed_at, created_at, updated_at, deleted_at";

/// Durable job persistence.
///
/// Soft-deleted rows (`deleted_at IS NOT NULL`) are invisible to every
/// operation. Transition methods fail with `NotFound` when the row is
/// missing. `to_failed` and `to_retrying` are the only place the attempt
/// counter is incremented; callers must not increment it themselves.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: Id) -> Result<Job, CoreError>;
    /// Look up the job admitted for a given broker message
    /// (`payload._meta.broker.message_id`). Used for replay detection.
    async fn find_by_broker_message_id(&self, message_id: &str) -> Result<Job, CoreError>;
    async fn update_status(
        &self,
        id: Id,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), CoreError>;
    async fn set_started_at(&self, id: Id, started_at: Timestamp) -> Result<(), CoreError>;
    async fn set_completed_at(&self, id: Id, completed_at: Timestamp) -> Result<(), CoreError>;
    async fn increment_attempts(&self, id: Id) -> Result<(), CoreError>;
    async fn to_processing(&self, id: Id, started_at: Timestamp) -> Result<(), CoreError>;
    async fn to_completed(&self, id: Id, completed_at: Timestamp) -> Result<(), CoreError>;
    /// Terminal failure; also increments `attempts`.
    async fn to_failed(&self, id: Id, error: &str) -> Result<(), CoreError>;
    /// Failure with retries remaining; also increments `attempts`.
    async fn to_retrying(&self, id: Id, error: &str) -> Result<(), CoreError>;
    /// Pending jobs whose scheduled time (if any) has arrived, ordered by
    /// priority DESC then created_at ASC.
    async fn list_pending(&self, limit: i64) -> Result<Vec<Job>, CoreError>;
    /// Jobs in a given status, newest first.
    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, CoreError>;
    /// Jobs eligible for re-admission: status `failed` or `retrying`,
    /// attempts remaining, last update older than `before`. Ordered by
    /// priority DESC then updated_at ASC.
    async fn list_retryable(&self, before: Timestamp, limit: i64) -> Result<Vec<Job>, CoreError>;
}

/// Postgres-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run an UPDATE and map zero affected rows to `NotFound`.
    async fn execute_update(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
        id: Id,
    ) -> Result<(), CoreError> {
        let result = query.execute(&self.pool).await.map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound { entity: "job", id });
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO jobs \
                 (id, job_type, priority, payload, attempts, max_attempts, status, error, \
                  scheduled_at, started_at, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(job.priority)
        .bind(&job.payload)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.status)
        .bind(&job.error)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn find_by_id(&self, id: Id) -> Result<Job, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or(CoreError::NotFound { entity: "job", id })
    }

    async fn find_by_broker_message_id(&self, message_id: &str) -> Result<Job, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE payload->'_meta'->'broker'->>'message_id' = $1 \
               AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or_else(|| CoreError::NotFound {
                entity: "job",
                id: uuid::Uuid::nil(),
            })
    }

    async fn update_status(
        &self,
        id: Id,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs SET status = $2, error = $3, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(status)
        .bind(error);
        self.execute_update(query, id).await
    }

    async fn set_started_at(&self, id: Id, started_at: Timestamp) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs SET started_at = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(started_at);
        self.execute_update(query, id).await
    }

    async fn set_completed_at(&self, id: Id, completed_at: Timestamp) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs SET completed_at = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(completed_at);
        self.execute_update(query, id).await
    }

    async fn increment_attempts(&self, id: Id) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs SET attempts = attempts + 1, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id);
        self.execute_update(query, id).await
    }

    async fn to_processing(&self, id: Id, started_at: Timestamp) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs SET status = $2, started_at = $3, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(JobStatus::Processing)
        .bind(started_at);
        self.execute_update(query, id).await
    }

    async fn to_completed(&self, id: Id, completed_at: Timestamp) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs SET status = $2, completed_at = $3, error = NULL, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(JobStatus::Completed)
        .bind(completed_at);
        self.execute_update(query, id).await
    }

    async fn to_failed(&self, id: Id, error: &str) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error = $3, attempts = attempts + 1, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(JobStatus::Failed)
        .bind(error);
        self.execute_update(query, id).await
    }

    async fn to_retrying(&self, id: Id, error: &str) -> Result<(), CoreError> {
        let query = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error = $3, attempts = attempts + 1, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(JobStatus::Retrying)
        .bind(error);
        self.execute_update(query, id).await
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Job>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 \
               AND deleted_at IS NULL \
               AND (scheduled_at IS NULL OR scheduled_at <= NOW()) \
             ORDER BY priority DESC, created_at ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }

    async fn list_retryable(&self, before: Timestamp, limit: i64) -> Result<Vec<Job>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status IN ($1, $2) \
               AND attempts < max_attempts \
               AND deleted_at IS NULL \
               AND updated_at < $3 \
             ORDER BY priority DESC, updated_at ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Failed)
            .bind(JobStatus::Retrying)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }
}
