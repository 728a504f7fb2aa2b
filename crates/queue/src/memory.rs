//! In-memory [`JobQueue`] mirroring the Redis key layout.
//!
//! FIFO per queue, plus the `processing` and `retry_schedule` sets. Used by
//! the worker/broker test suites and for running the platform without a
//! broker.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::types::{Id, Timestamp};
use conveyor_core::CoreError;
use conveyor_db::models::Job;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{DequeuedJob, JobQueue, QUEUE_KEY};

#[derive(Default)]
struct State {
    /// queue name -> serialized jobs, head at the front.
    queues: HashMap<String, VecDeque<String>>,
    /// job id -> pickup time.
    processing: HashMap<Id, Timestamp>,
    /// job id -> eligible-at.
    retry_schedule: HashMap<Id, Timestamp>,
}

/// In-memory queue with blocking dequeue semantics.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    pushed: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a job currently sits in the processing set.
    pub fn is_processing(&self, id: Id) -> bool {
        self.state.lock().unwrap().processing.contains_key(&id)
    }

    /// The retry-schedule entry for a job, if any.
    pub fn retry_eligible_at(&self, id: Id) -> Option<Timestamp> {
        self.state.lock().unwrap().retry_schedule.get(&id).copied()
    }

    fn try_pop(&self, queues: &[String]) -> Option<DequeuedJob> {
        let mut state = self.state.lock().unwrap();
        for queue in queues {
            while let Some(payload) = state.queues.get_mut(queue).and_then(VecDeque::pop_back) {
                match serde_json::from_str::<Job>(&payload) {
                    Ok(job) => {
                        return Some(DequeuedJob {
                            job,
                            queue: queue.clone(),
                        })
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "dropping undecodable queue payload");
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), CoreError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| CoreError::Io(format!("serialize job: {e}")))?;
        {
            let mut state = self.state.lock().unwrap();
            state
                .queues
                .entry(QUEUE_KEY.to_string())
                .or_default()
                .push_front(payload);
            if let Some(scheduled_at) = job.scheduled_at {
                if scheduled_at > Utc::now() {
                    state.retry_schedule.insert(job.id, scheduled_at);
                }
            }
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<DequeuedJob>, CoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.try_pop(queues) {
                return Ok(Some(found));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // Wake on push or give up at the deadline.
            if tokio::time::timeout(remaining, self.pushed.notified())
                .await
                .is_err()
            {
                return Ok(self.try_pop(queues));
            }
        }
    }

    async fn mark_processing(&self, id: Id) -> Result<(), CoreError> {
        self.state.lock().unwrap().processing.insert(id, Utc::now());
        Ok(())
    }

    async fn mark_completed(&self, id: Id) -> Result<(), CoreError> {
        self.state.lock().unwrap().processing.remove(&id);
        Ok(())
    }

    async fn mark_failed(&self, id: Id, retry_delay: Duration) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        state.processing.remove(&id);
        if !retry_delay.is_zero() {
            let eligible_at = Utc::now()
                + chrono::Duration::from_std(retry_delay).unwrap_or_else(|_| chrono::Duration::zero());
            state.retry_schedule.insert(id, eligible_at);
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<i64, CoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, |q| q.len() as i64))
    }

    async fn processing_ids(&self) -> Result<Vec<Id>, CoreError> {
        Ok(self.state.lock().unwrap().processing.keys().copied().collect())
    }
}
