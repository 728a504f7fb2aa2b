//! The broker listener: poll, admit, acknowledge.

use std::sync::Arc;
use std::time::Duration;

use conveyor_core::CoreError;
use conveyor_worker::JobManager;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message;
use crate::stream::{StreamClient, StreamEntry};

/// Error texts that must never trigger a re-delivery.
const NON_RETRYABLE_ERRORS: [&str; 3] =
    ["invalid_payload", "malformed_data", "authentication_failed"];

/// Listener tuning. Ranges follow the broker's own limits; out-of-range
/// values are clamped by the config loader.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Streams to poll.
    pub streams: Vec<String>,
    /// Consumer group name.
    pub group: String,
    /// Pollers per stream.
    pub workers_per_stream: usize,
    /// Entries fetched per poll (1-10).
    pub max_messages: usize,
    /// Long-poll block time (0-20s).
    pub wait_time: Duration,
    /// Unacknowledged entries older than this are re-delivered.
    pub visibility_timeout: Duration,
    /// Pause after a poll error.
    pub polling_interval: Duration,
    /// How long shutdown waits for pollers to drain.
    pub shutdown_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            streams: vec!["events:jobs".to_string()],
            group: "conveyor".to_string(),
            workers_per_stream: 1,
            max_messages: 10,
            wait_time: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(30),
            polling_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// What to do with an entry after one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge: the entry was admitted, was a duplicate, or can never
    /// be processed.
    Ack,
    /// Leave unacknowledged; the visibility timeout will re-deliver it.
    Retry,
}

/// Turns validated bus events into jobs through the job manager.
///
/// Kept separate from the polling machinery so the admission logic can be
/// exercised without a live broker.
pub struct JobManagerBridge {
    manager: Arc<JobManager>,
}

impl JobManagerBridge {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }

    /// Process one entry and decide its fate.
    pub async fn handle_entry(&self, queue: &str, entry: &StreamEntry) -> Disposition {
        let event = match message::parse_event(&entry.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(message_id = %entry.id, error = %e, "Dropping poison message");
                return Disposition::Ack;
            }
        };

        let event_type = event.event_type.clone();
        let request = message::build_job_request(event, queue, entry);

        match self.manager.create_job(request).await {
            Ok(job) => {
                tracing::info!(
                    message_id = %entry.id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    event_type,
                    "Bus event admitted as job"
                );
                Disposition::Ack
            }
            Err(err) if should_retry(&err) => {
                tracing::error!(
                    message_id = %entry.id,
                    error = %err,
                    "Job admission failed; leaving message for re-delivery"
                );
                Disposition::Retry
            }
            Err(err) => {
                tracing::error!(
                    message_id = %entry.id,
                    error = %err,
                    "Job admission failed permanently; dropping message"
                );
                Disposition::Ack
            }
        }
    }
}

/// Retry on transient transport failures only; validation problems,
/// duplicates, and the broker's closed set of permanent error texts are
/// acknowledged so they cannot loop forever.
fn should_retry(err: &CoreError) -> bool {
    match err {
        CoreError::Validation(_) | CoreError::NotFound { .. } | CoreError::Conflict(_) => false,
        CoreError::Io(msg) | CoreError::Timeout(msg) => {
            !NON_RETRYABLE_ERRORS.iter().any(|s| msg == s)
        }
    }
}

/// Polls the configured streams and feeds entries through the bridge.
pub struct BrokerListener {
    client: StreamClient,
    config: BrokerConfig,
    bridge: Arc<JobManagerBridge>,
    cancel: CancellationToken,
    stop: CancellationToken,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl BrokerListener {
    pub fn new(
        client: StreamClient,
        config: BrokerConfig,
        manager: Arc<JobManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            bridge: Arc::new(JobManagerBridge::new(manager)),
            cancel,
            stop: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Create the consumer groups and spawn one poller per
    /// `(stream, worker)` pair.
    pub async fn start(&self) -> Result<(), CoreError> {
        tracing::info!(
            streams = ?self.config.streams,
            workers_per_stream = self.config.workers_per_stream,
            "Starting broker listener"
        );

        for stream in &self.config.streams {
            self.client.ensure_group(stream).await?;
        }

        let mut tasks = self.tasks.lock().await;
        for stream in &self.config.streams {
            for worker_id in 0..self.config.workers_per_stream.max(1) {
                let poller = Poller {
                    client: self.client.clone(),
                    config: self.config.clone(),
                    bridge: Arc::clone(&self.bridge),
                    cancel: self.cancel.clone(),
                    stop: self.stop.clone(),
                    stream: stream.clone(),
                    worker_id,
                };
                tasks.spawn(poller.run());
            }
        }
        Ok(())
    }

    /// Signal the pollers to stop and wait out the drain grace period.
    pub async fn stop(&self) {
        tracing::info!("Stopping broker listener");
        self.stop.cancel();

        let mut tasks = self.tasks.lock().await;
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for broker pollers to stop");
        } else {
            tracing::info!("Broker listener stopped");
        }
    }
}

/// One poll loop over one stream.
struct Poller {
    client: StreamClient,
    config: BrokerConfig,
    bridge: Arc<JobManagerBridge>,
    cancel: CancellationToken,
    stop: CancellationToken,
    stream: String,
    worker_id: usize,
}

impl Poller {
    async fn run(self) {
        tracing::info!(stream = %self.stream, worker_id = self.worker_id, "Broker poller started");
        let consumer = format!("worker-{}", self.worker_id);
        let mut last_reclaim = Instant::now();

        loop {
            if self.cancel.is_cancelled() || self.stop.is_cancelled() {
                tracing::info!(stream = %self.stream, worker_id = self.worker_id, "Broker poller stopping");
                return;
            }

            let read = tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = self.stop.cancelled() => return,
                read = self.client.read(
                    &self.stream,
                    &consumer,
                    self.config.max_messages.clamp(1, 10),
                    self.config.wait_time,
                ) => read,
            };

            match read {
                Ok(entries) => {
                    for entry in entries {
                        self.process(entry).await;
                    }
                }
                Err(e) => {
                    tracing::error!(stream = %self.stream, error = %e, "Error polling broker");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = self.stop.cancelled() => return,
                        _ = tokio::time::sleep(self.config.polling_interval) => {}
                    }
                }
            }

            // Worker 0 periodically reclaims entries abandoned past the
            // visibility timeout.
            if self.worker_id == 0 && last_reclaim.elapsed() >= self.config.visibility_timeout {
                last_reclaim = Instant::now();
                match self
                    .client
                    .claim_stale(
                        &self.stream,
                        &consumer,
                        self.config.visibility_timeout,
                        self.config.max_messages.clamp(1, 10),
                    )
                    .await
                {
                    Ok(stale) => {
                        for entry in stale {
                            tracing::info!(
                                stream = %self.stream,
                                message_id = %entry.id,
                                "Re-delivering unacknowledged message"
                            );
                            self.process(entry).await;
                        }
                    }
                    Err(e) => {
                        tracing::error!(stream = %self.stream, error = %e, "Failed to reclaim stale messages");
                    }
                }
            }
        }
    }

    async fn process(&self, entry: StreamEntry) {
        let disposition = self.bridge.handle_entry(&self.stream, &entry).await;
        if disposition == Disposition::Ack {
            if let Err(e) = self.client.ack(&self.stream, &entry.id).await {
                tracing::error!(
                    stream = %self.stream,
                    message_id = %entry.id,
                    error = %e,
                    "Failed to acknowledge message"
                );
            }
        }
    }
}
