//! Retry scheduler: periodic re-admission of failed-but-eligible jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conveyor_db::models::JobStatus;
use conveyor_db::repositories::JobStore;
use conveyor_queue::JobQueue;
use tokio_util::sync::CancellationToken;

/// Timing for the retry scan. Defaults match production; tests shrink them.
#[derive(Debug, Clone)]
pub struct RetrySchedulerConfig {
    /// How often the scan runs.
    pub interval: Duration,
    /// Only jobs whose last update is at least this old are re-admitted;
    /// keeps the scan from racing workers over very recent failures.
    pub look_back: Duration,
    /// Maximum jobs re-admitted per scan.
    pub batch_size: i64,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            look_back: Duration::from_secs(5 * 60),
            batch_size: 100,
        }
    }
}

/// Moves eligible failed jobs back to `Pending` and re-enqueues them.
pub struct RetryScheduler {
    config: RetrySchedulerConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

impl RetryScheduler {
    pub fn new(
        config: RetrySchedulerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }

    /// Run the scan loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            look_back_secs = self.config.look_back.as_secs(),
            "Retry scheduler started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Retry scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    /// One scan: re-admit up to `batch_size` eligible jobs.
    ///
    /// Errors on individual jobs are logged and do not stop the scan.
    /// Returns the number of jobs re-admitted.
    pub async fn run_once(&self) -> usize {
        let before = Utc::now()
            - chrono::Duration::from_std(self.config.look_back)
                .unwrap_or_else(|_| chrono::Duration::zero());

        let jobs = match self.store.list_retryable(before, self.config.batch_size).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list retryable jobs");
                return 0;
            }
        };

        if jobs.is_empty() {
            return 0;
        }
        tracing::info!(count = jobs.len(), "Found retryable jobs");

        let mut readmitted = 0;
        for mut job in jobs {
            if let Err(e) = self
                .store
                .update_status(job.id, JobStatus::Pending, None)
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to reset job for retry");
                continue;
            }

            job.status = JobStatus::Pending;
            job.error = None;
            if let Err(e) = self.queue.enqueue(&job).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to re-enqueue job");
                continue;
            }

            tracing::info!(job_id = %job.id, attempts = job.attempts, "Job re-queued for retry");
            readmitted += 1;
        }
        readmitted
    }
}
