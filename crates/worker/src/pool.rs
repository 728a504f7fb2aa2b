//! Bounded worker pool: dequeue, execute, finalize.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conveyor_core::retry::retry_delay;
use conveyor_core::CoreError;
use conveyor_db::models::{Job, JobStatus};
use conveyor_db::repositories::JobStore;
use conveyor_queue::{worker_queues, JobQueue};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::handler::HandlerRegistry;
use crate::stats::SharedStats;

/// Tuning knobs for the pool. Defaults match production behaviour; tests
/// shrink the durations.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of parallel workers.
    pub workers: usize,
    /// How long one blocking dequeue waits before coming back empty.
    pub dequeue_timeout: Duration,
    /// Pause after a dequeue error before trying again.
    pub error_backoff: Duration,
    /// Budget for each finalization step (bookkeeping around a handler
    /// call). Finalization runs detached from the pool token so shutdown
    /// cannot corrupt job state.
    pub finalize_timeout: Duration,
    /// How often queue depths are re-sampled into the stats.
    pub depth_sample_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            dequeue_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            finalize_timeout: Duration::from_secs(30),
            depth_sample_interval: Duration::from_secs(30),
        }
    }
}

/// N cooperating workers draining the job queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    stats: Arc<SharedStats>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        stats: Arc<SharedStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            registry,
            stats,
            cancel,
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn the workers and the queue-depth sampler.
    pub async fn start(&self) {
        tracing::info!(workers = self.config.workers, "Starting worker pool");
        self.stats.set_total_workers(self.config.workers);

        let mut tasks = self.tasks.lock().await;
        for worker_id in 0..self.config.workers {
            let ctx = WorkerContext {
                worker_id,
                config: self.config.clone(),
                queue: Arc::clone(&self.queue),
                store: Arc::clone(&self.store),
                registry: Arc::clone(&self.registry),
                stats: Arc::clone(&self.stats),
                cancel: self.cancel.clone(),
            };
            tasks.spawn(ctx.run());
        }

        tasks.spawn(run_depth_sampler(
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
            self.config.depth_sample_interval,
            self.cancel.clone(),
        ));
    }

    /// Cancel the pool and wait up to `deadline` for in-flight work.
    pub async fn stop(&self, deadline: Duration) -> Result<(), CoreError> {
        tracing::info!("Stopping worker pool");
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        match tokio::time::timeout(deadline, drain).await {
            Ok(()) => {
                tracing::info!("Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Worker pool stop timed out");
                Err(CoreError::Timeout("worker pool drain".into()))
            }
        }
    }
}

/// Everything one worker task needs, cloned per worker.
struct WorkerContext {
    worker_id: usize,
    config: WorkerPoolConfig,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    stats: Arc<SharedStats>,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn run(self) {
        tracing::info!(worker_id = self.worker_id, "Worker started");
        let queues = worker_queues();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(worker_id = self.worker_id, "Worker stopping");
                    break;
                }
                popped = self.queue.dequeue(&queues, self.config.dequeue_timeout) => {
                    match popped {
                        Ok(Some(dequeued)) => {
                            self.stats.job_started();
                            self.process_job(dequeued.job).await;
                            self.stats.job_finished();
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(
                                worker_id = self.worker_id,
                                error = %e,
                                "Failed to dequeue job"
                            );
                            tokio::select! {
                                _ = self.cancel.cancelled() => break,
                                _ = tokio::time::sleep(self.config.error_backoff) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    async fn process_job(&self, job: Job) {
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            "Processing job"
        );

        // Re-deliveries of already-finished work are dropped here so a
        // completed job never transitions again.
        match self.store.find_by_id(job.id).await {
            Ok(current) if current.status == JobStatus::Completed => {
                tracing::warn!(job_id = %job.id, "Skipping re-delivered completed job");
                let _ = self
                    .finalize("mark_completed", self.queue.mark_completed(job.id))
                    .await;
                return;
            }
            Ok(_) => {}
            Err(CoreError::NotFound { .. }) => {
                tracing::error!(job_id = %job.id, "Dropping job with no live row");
                return;
            }
            Err(e) => {
                // Transient store error: better to process than to lose the
                // dequeued copy.
                tracing::warn!(job_id = %job.id, error = %e, "Status pre-check failed, proceeding");
            }
        }

        if let Err(e) = self
            .finalize("mark_processing", self.queue.mark_processing(job.id))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as processing");
            return;
        }

        if let Err(e) = self
            .finalize("to_processing", self.store.to_processing(job.id, Utc::now()))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to move job to processing");
        }

        let Some(handler) = self.registry.get(&job.job_type) else {
            let err = anyhow::anyhow!("no handler registered for job type: {}", job.job_type);
            self.handle_failure(&job, &err).await;
            return;
        };

        // The handler gets the root token so it can observe shutdown; the
        // bookkeeping around it deliberately does not.
        match handler.handle(&self.cancel, &job).await {
            Ok(()) => self.handle_success(&job).await,
            Err(err) => self.handle_failure(&job, &err).await,
        }
    }

    async fn handle_success(&self, job: &Job) {
        if let Err(e) = self
            .finalize("to_completed", self.store.to_completed(job.id, Utc::now()))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to move job to completed");
        }
        if let Err(e) = self
            .finalize("mark_completed", self.queue.mark_completed(job.id))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to clear job from processing set");
        }
        self.stats.record_success();
        tracing::info!(job_id = %job.id, "Job completed");
    }

    async fn handle_failure(&self, job: &Job, err: &anyhow::Error) {
        tracing::error!(job_id = %job.id, error = %err, "Job failed");

        // The store performs the authoritative increment inside
        // to_failed/to_retrying; this copy only decides the branch and the
        // backoff exponent.
        let next_attempts = job.attempts + 1;
        let message = err.to_string();

        if next_attempts >= job.max_attempts {
            if let Err(e) = self
                .finalize("to_failed", self.store.to_failed(job.id, &message))
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to move job to failed");
            }
            if let Err(e) = self
                .finalize("mark_failed", self.queue.mark_failed(job.id, Duration::ZERO))
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to clear failed job from queue");
            }
            tracing::info!(job_id = %job.id, attempts = next_attempts, "Job permanently failed");
        } else {
            let delay = retry_delay(next_attempts);
            if let Err(e) = self
                .finalize("to_retrying", self.store.to_retrying(job.id, &message))
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to move job to retrying");
            }
            if let Err(e) = self
                .finalize("mark_failed", self.queue.mark_failed(job.id, delay))
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to schedule job retry");
            }
            tracing::info!(
                job_id = %job.id,
                attempts = next_attempts,
                retry_delay_secs = delay.as_secs(),
                "Job scheduled for retry"
            );
        }

        self.stats.record_failure();
    }

    /// Run a finalization step under its own deadline, detached from the
    /// pool token: these steps must complete even while draining.
    async fn finalize<T>(
        &self,
        label: &'static str,
        fut: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        match tokio::time::timeout(self.config.finalize_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout(label.into())),
        }
    }
}

/// Re-sample queue depths into the shared stats on a fixed interval.
async fn run_depth_sampler(
    queue: Arc<dyn JobQueue>,
    stats: Arc<SharedStats>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for queue_name in worker_queues() {
                    match queue.depth(&queue_name).await {
                        Ok(depth) => stats.set_queue_depth(&queue_name, depth),
                        Err(e) => {
                            tracing::error!(queue = %queue_name, error = %e, "Failed to sample queue depth");
                        }
                    }
                }
            }
        }
    }
}
