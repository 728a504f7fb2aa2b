//! Job admission façade: validate, persist, enqueue.

use std::sync::Arc;

use conveyor_core::types::{Id, Timestamp};
use conveyor_core::CoreError;
use conveyor_db::models::job::DEFAULT_MAX_ATTEMPTS;
use conveyor_db::models::{Job, JobPriority, JobStatus};
use conveyor_db::repositories::JobStore;
use conveyor_queue::JobQueue;
use serde::Deserialize;

/// Default page size for status listings.
const DEFAULT_LIST_LIMIT: i64 = 50;

/// Request to admit a new job, from API callers or the broker bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub priority: JobPriority,
    pub payload: Option<serde_json::Value>,
    pub max_attempts: Option<i32>,
    pub scheduled_at: Option<Timestamp>,
}

/// The single entry point for creating and reading jobs.
///
/// Both internal callers and the broker listener go through this type, so
/// every admitted job is persisted before it is enqueued.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate the request, persist a `Pending` job, and enqueue it.
    ///
    /// If the enqueue fails after the row was created, the error is
    /// surfaced and the row stays `Pending`; it was never handed to a
    /// worker, so recovery needs an operator. Logged loudly for that
    /// reason.
    pub async fn create_job(&self, req: CreateJobRequest) -> Result<Job, CoreError> {
        if req.job_type.is_empty() {
            return Err(CoreError::Validation("job type is required".into()));
        }

        let max_attempts = match req.max_attempts {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_ATTEMPTS,
        };
        let payload = match req.payload {
            Some(value) if value.is_object() => value,
            _ => serde_json::json!({}),
        };

        let job = Job::new(
            req.job_type,
            req.priority,
            payload,
            max_attempts,
            req.scheduled_at,
        );

        self.store.create(&job).await.inspect_err(|e| {
            tracing::error!(job_id = %job.id, error = %e, "Failed to create job in database");
        })?;

        if let Err(e) = self.queue.enqueue(&job).await {
            tracing::error!(
                job_id = %job.id,
                job_type = %job.job_type,
                error = %e,
                "Job persisted but not enqueued; row remains pending and needs manual re-admission"
            );
            return Err(e);
        }

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            "Job created"
        );
        Ok(job)
    }

    pub async fn get_job(&self, id: Id) -> Result<Job, CoreError> {
        self.store.find_by_id(id).await
    }

    pub async fn list_by_status(
        &self,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<Job>, CoreError> {
        let limit = if limit <= 0 { DEFAULT_LIST_LIMIT } else { limit };
        self.store.list_by_status(status, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_db::repositories::InMemoryJobStore;
    use conveyor_queue::{InMemoryJobQueue, QUEUE_KEY};
    use serde_json::json;

    fn manager() -> (Arc<InMemoryJobStore>, Arc<InMemoryJobQueue>, JobManager) {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let manager = JobManager::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::clone(&queue) as Arc<dyn JobQueue>,
        );
        (store, queue, manager)
    }

    fn request(job_type: &str) -> CreateJobRequest {
        CreateJobRequest {
            job_type: job_type.into(),
            priority: JobPriority::High,
            payload: Some(json!({"user_id": "u1", "amount": 100.0})),
            max_attempts: Some(3),
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn create_persists_then_enqueues() {
        let (store, queue, manager) = manager();
        let job = manager.create_job(request("init_claim")).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(store.raw(job.id).unwrap().job_type, "init_claim");
        assert_eq!(queue.depth(QUEUE_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_type_is_rejected_before_any_write() {
        let (store, queue, manager) = manager();
        let err = manager.create_job(request("")).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(queue.depth(QUEUE_KEY).await.unwrap(), 0);
        assert!(store.list_by_status(JobStatus::Pending, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn defaults_applied_for_attempts_and_payload() {
        let (_store, _queue, manager) = manager();
        let job = manager
            .create_job(CreateJobRequest {
                job_type: "init_claim".into(),
                priority: JobPriority::default(),
                payload: None,
                max_attempts: Some(-2),
                scheduled_at: None,
            })
            .await
            .unwrap();
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(job.payload, json!({}));
        assert_eq!(job.priority, JobPriority::Normal);
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_skips_enqueue() {
        let (store, queue, manager) = manager();
        store.set_fail_creates(true);

        let err = manager.create_job(request("init_claim")).await.unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
        assert_eq!(queue.depth(QUEUE_KEY).await.unwrap(), 0);
    }
}
