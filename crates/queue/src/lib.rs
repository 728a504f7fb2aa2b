//! Durable FIFO job queue with delayed-visibility support.
//!
//! One logical queue carries every job regardless of priority; priority is
//! recorded on the job itself and honoured by the store's pending-listing.
//! Alongside the queue live two ordered sets: `processing` (jobs currently
//! held by a worker, scored by pickup time) and `retry_schedule` (jobs
//! waiting out a backoff delay, scored by the moment they become eligible).

pub mod memory;
pub mod redis;

pub use memory::InMemoryJobQueue;
pub use self::redis::RedisJobQueue;

use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::types::Id;
use conveyor_core::CoreError;
use conveyor_db::models::Job;

/// The single logical job queue (Redis list).
pub const QUEUE_KEY: &str = "{jobs}:queue";

/// Ordered set of jobs currently held by workers, scored by pickup time.
pub const PROCESSING_SET_KEY: &str = "{jobs}:processing";

/// Ordered set of `(job_id, eligible_at)` entries awaiting re-admission.
pub const RETRY_SCHEDULE_KEY: &str = "{jobs}:retry_schedule";

/// The queues a worker should drain, in drain order.
pub fn worker_queues() -> Vec<String> {
    vec![QUEUE_KEY.to_string()]
}

/// A job popped from the queue along with the queue it came from.
#[derive(Debug, Clone)]
pub struct DequeuedJob {
    pub job: Job,
    pub queue: String,
}

/// Queue capability consumed by the worker pool and job manager.
///
/// Implementations retry each operation once locally on a transient
/// transport error before surfacing `CoreError::Io`; `dequeue` returns
/// `Ok(None)` cleanly on timeout.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push the serialized job to the queue tail. Jobs scheduled for the
    /// future are additionally recorded in the retry schedule.
    async fn enqueue(&self, job: &Job) -> Result<(), CoreError>;

    /// Blocking pop from the head of one of `queues`, waiting up to
    /// `timeout`.
    async fn dequeue(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<DequeuedJob>, CoreError>;

    /// Record that a worker picked the job up.
    async fn mark_processing(&self, id: Id) -> Result<(), CoreError>;

    /// Remove the job from the processing set after success.
    async fn mark_completed(&self, id: Id) -> Result<(), CoreError>;

    /// Remove the job from the processing set after failure; when
    /// `retry_delay` is non-zero, schedule it for re-admission.
    async fn mark_failed(&self, id: Id, retry_delay: Duration) -> Result<(), CoreError>;

    /// Number of jobs waiting in a queue.
    async fn depth(&self, queue: &str) -> Result<i64, CoreError>;

    /// Ids currently in the processing set.
    async fn processing_ids(&self) -> Result<Vec<Id>, CoreError>;
}
