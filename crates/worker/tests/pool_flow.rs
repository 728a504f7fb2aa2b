//! Worker pool lifecycle tests against the in-memory store and queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::types::Id;
use conveyor_db::models::{Job, JobPriority, JobStatus};
use conveyor_db::repositories::{InMemoryJobStore, JobStore};
use conveyor_queue::{InMemoryJobQueue, JobQueue};
use conveyor_worker::{
    CreateJobRequest, HandlerRegistry, JobHandler, JobManager, RetryScheduler,
    RetrySchedulerConfig, SharedStats, WorkerPool, WorkerPoolConfig,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test handlers
// ---------------------------------------------------------------------------

struct Succeed(&'static str);

#[async_trait]
impl JobHandler for Succeed {
    fn job_type(&self) -> &str {
        self.0
    }

    async fn handle(&self, _cancel: &CancellationToken, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fails until the job has accumulated `fail_until` attempts.
struct Flaky {
    job_type: &'static str,
    fail_until: i32,
    invocations: AtomicU32,
}

#[async_trait]
impl JobHandler for Flaky {
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn handle(&self, _cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if job.attempts < self.fail_until {
            anyhow::bail!("transient downstream failure");
        }
        Ok(())
    }
}

struct AlwaysFail(&'static str);

#[async_trait]
impl JobHandler for AlwaysFail {
    fn job_type(&self) -> &str {
        self.0
    }

    async fn handle(&self, _cancel: &CancellationToken, _job: &Job) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<InMemoryJobStore>,
    queue: Arc<InMemoryJobQueue>,
    stats: Arc<SharedStats>,
    manager: JobManager,
    pool: WorkerPool,
    scheduler: Arc<RetryScheduler>,
    cancel: CancellationToken,
}

fn harness(handlers: Vec<Arc<dyn JobHandler>>) -> Harness {
    let store = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let stats = Arc::new(SharedStats::new());
    let cancel = CancellationToken::new();

    let mut registry = HandlerRegistry::new();
    for handler in handlers {
        registry.register(handler);
    }

    let pool = WorkerPool::new(
        WorkerPoolConfig {
            workers: 2,
            dequeue_timeout: Duration::from_millis(50),
            error_backoff: Duration::from_millis(10),
            finalize_timeout: Duration::from_secs(5),
            depth_sample_interval: Duration::from_millis(50),
        },
        Arc::clone(&queue) as Arc<dyn JobQueue>,
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::new(registry),
        Arc::clone(&stats),
        cancel.clone(),
    );

    let scheduler = Arc::new(RetryScheduler::new(
        RetrySchedulerConfig {
            interval: Duration::from_millis(20),
            look_back: Duration::ZERO,
            batch_size: 100,
        },
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&queue) as Arc<dyn JobQueue>,
    ));

    let manager = JobManager::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&queue) as Arc<dyn JobQueue>,
    );

    Harness {
        store,
        queue,
        stats,
        manager,
        pool,
        scheduler,
        cancel,
    }
}

fn spawn_scheduler(h: &Harness) {
    let scheduler = Arc::clone(&h.scheduler);
    let cancel = h.cancel.clone();
    tokio::spawn(async move { scheduler.run(cancel).await });
}

/// Poll the store until the job satisfies `done`, asserting along the way
/// that attempts never decrease and a completed job never leaves that
/// state.
async fn wait_for(
    store: &InMemoryJobStore,
    id: Id,
    timeout: Duration,
    done: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_attempts = 0;
    let mut seen_completed = false;

    loop {
        if let Some(job) = store.raw(id) {
            assert!(
                job.attempts >= last_attempts,
                "attempts must be monotone: {} -> {}",
                last_attempts,
                job.attempts
            );
            assert!(
                job.attempts <= job.max_attempts,
                "attempts must never exceed max_attempts"
            );
            if seen_completed {
                assert_eq!(job.status, JobStatus::Completed, "completed is terminal");
            }
            last_attempts = job.attempts;
            seen_completed = seen_completed || job.status == JobStatus::Completed;

            if done(&job) {
                return job;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {id} to converge"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the stats until `done`; counters are bumped after the store
/// transition, so status-based waits may observe them a beat late.
async fn wait_stats(
    stats: &SharedStats,
    timeout: Duration,
    done: impl Fn(&conveyor_worker::PoolStats) -> bool,
) -> conveyor_worker::PoolStats {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = stats.snapshot();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for stats to converge: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_completes_and_counts() {
    let h = harness(vec![Arc::new(Succeed("init_claim")) as Arc<dyn JobHandler>]);
    h.pool.start().await;

    let job = h
        .manager
        .create_job(CreateJobRequest {
            job_type: "init_claim".into(),
            priority: JobPriority::High,
            payload: Some(json!({"user_id": "u1", "amount": 100.0})),
            max_attempts: Some(3),
            scheduled_at: None,
        })
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);

    let done = wait_for(&h.store, job.id, Duration::from_secs(5), |j| {
        j.status == JobStatus::Completed
    })
    .await;

    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());
    assert!(!h.queue.is_processing(job.id));

    let stats = wait_stats(&h.stats, Duration::from_secs(2), |s| s.total_processed == 1).await;
    assert_eq!(stats.total_failed, 0);

    h.pool.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn flaky_job_retries_then_completes() {
    let flaky = Arc::new(Flaky {
        job_type: "kyc_verification",
        fail_until: 2,
        invocations: AtomicU32::new(0),
    });
    let h = harness(vec![Arc::clone(&flaky) as Arc<dyn JobHandler>]);
    h.pool.start().await;
    spawn_scheduler(&h);

    let job = h
        .manager
        .create_job(CreateJobRequest {
            job_type: "kyc_verification".into(),
            priority: JobPriority::High,
            payload: Some(json!({"user": "u2"})),
            max_attempts: Some(3),
            scheduled_at: None,
        })
        .await
        .unwrap();

    let done = wait_for(&h.store, job.id, Duration::from_secs(10), |j| {
        j.status == JobStatus::Completed
    })
    .await;

    assert_eq!(done.attempts, 2);
    assert_eq!(flaky.invocations.load(Ordering::SeqCst), 3);

    let stats = wait_stats(&h.stats, Duration::from_secs(2), |s| s.total_processed == 1).await;
    assert!(stats.total_failed >= 1);

    h.pool.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn permanent_failure_is_terminal() {
    let h = harness(vec![Arc::new(AlwaysFail("always_fail")) as Arc<dyn JobHandler>]);
    h.pool.start().await;
    spawn_scheduler(&h);

    let job = h
        .manager
        .create_job(CreateJobRequest {
            job_type: "always_fail".into(),
            priority: JobPriority::Normal,
            payload: None,
            max_attempts: Some(2),
            scheduled_at: None,
        })
        .await
        .unwrap();

    let done = wait_for(&h.store, job.id, Duration::from_secs(10), |j| {
        j.status == JobStatus::Failed && j.attempts == 2
    })
    .await;
    assert_eq!(done.error.as_deref(), Some("boom"));

    // Out of attempts: the scheduler must leave it failed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = h.store.raw(job.id).unwrap();
    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.attempts, 2);

    let stats = wait_stats(&h.stats, Duration::from_secs(2), |s| s.total_failed == 2).await;
    assert_eq!(stats.total_processed, 0);

    h.pool.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn missing_handler_routes_through_failure_path() {
    let h = harness(vec![]);
    h.pool.start().await;

    let job = h
        .manager
        .create_job(CreateJobRequest {
            job_type: "unregistered".into(),
            priority: JobPriority::Normal,
            payload: None,
            max_attempts: Some(1),
            scheduled_at: None,
        })
        .await
        .unwrap();

    let done = wait_for(&h.store, job.id, Duration::from_secs(5), |j| {
        j.status == JobStatus::Failed
    })
    .await;
    assert!(done
        .error
        .as_deref()
        .unwrap()
        .contains("no handler registered"));
    wait_stats(&h.stats, Duration::from_secs(2), |s| s.total_failed == 1).await;

    h.pool.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn redelivery_of_completed_job_is_a_no_op() {
    let h = harness(vec![Arc::new(Succeed("init_claim")) as Arc<dyn JobHandler>]);
    h.pool.start().await;

    let job = h
        .manager
        .create_job(CreateJobRequest {
            job_type: "init_claim".into(),
            priority: JobPriority::Normal,
            payload: None,
            max_attempts: Some(3),
            scheduled_at: None,
        })
        .await
        .unwrap();

    let done = wait_for(&h.store, job.id, Duration::from_secs(5), |j| {
        j.status == JobStatus::Completed
    })
    .await;
    let completed_at = done.completed_at;

    // Simulate an at-least-once re-delivery of the original message.
    h.queue.enqueue(&job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after = h.store.raw(job.id).unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.completed_at, completed_at);
    assert_eq!(after.attempts, 0);

    // No second completion, no phantom failures.
    let stats = h.stats.snapshot();
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.total_failed, 0);

    h.pool.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn stop_drains_within_deadline() {
    let h = harness(vec![Arc::new(Succeed("init_claim")) as Arc<dyn JobHandler>]);
    h.pool.start().await;
    h.pool.stop(Duration::from_secs(5)).await.unwrap();
}
