//! Worker pool statistics and the health monitor loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A point-in-time snapshot of the pool's counters and queue depths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub active_workers: usize,
    pub processing_jobs: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub queue_depths: HashMap<String, i64>,
}

/// The single piece of process-wide mutable state: pool counters behind
/// one reader-writer lock. Writers hold the lock only for the update.
#[derive(Default)]
pub struct SharedStats {
    inner: RwLock<PoolStats>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PoolStats {
        self.inner.read().unwrap().clone()
    }

    pub fn set_total_workers(&self, workers: usize) {
        self.inner.write().unwrap().total_workers = workers;
    }

    /// A worker picked a job up.
    pub fn job_started(&self) {
        let mut stats = self.inner.write().unwrap();
        stats.active_workers += 1;
        stats.processing_jobs += 1;
    }

    /// A worker finished a job, successfully or not.
    pub fn job_finished(&self) {
        let mut stats = self.inner.write().unwrap();
        stats.active_workers = stats.active_workers.saturating_sub(1);
        stats.processing_jobs = stats.processing_jobs.saturating_sub(1);
    }

    pub fn record_success(&self) {
        self.inner.write().unwrap().total_processed += 1;
    }

    pub fn record_failure(&self) {
        self.inner.write().unwrap().total_failed += 1;
    }

    pub fn set_queue_depth(&self, queue: &str, depth: i64) {
        self.inner
            .write()
            .unwrap()
            .queue_depths
            .insert(queue.to_string(), depth);
    }
}

/// Periodically log the full stats snapshot.
///
/// Runs until `cancel` fires. Intervals at or below zero are rejected by
/// the caller's config layer, so no clamping happens here.
pub async fn run_health_monitor(
    stats: Arc<SharedStats>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Health monitor started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it so the first report
    // happens one full interval in.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Health monitor stopping");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = stats.snapshot();
                tracing::info!(
                    total_workers = snapshot.total_workers,
                    active_workers = snapshot.active_workers,
                    processing_jobs = snapshot.processing_jobs,
                    total_processed = snapshot.total_processed,
                    total_failed = snapshot.total_failed,
                    queue_depths = ?snapshot.queue_depths,
                    "Worker pool stats"
                );
            }
        }
    }
}
