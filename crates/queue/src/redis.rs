//! Redis-backed [`JobQueue`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::types::Id;
use conveyor_core::CoreError;
use conveyor_db::models::Job;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::{DequeuedJob, JobQueue, PROCESSING_SET_KEY, QUEUE_KEY, RETRY_SCHEDULE_KEY};

/// Job queue on a Redis list plus two sorted sets.
///
/// The connection manager reconnects transparently; on top of that every
/// command gets one local retry before the error is surfaced to the
/// caller.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl RedisJobQueue {
    /// Connect to the broker at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoreError::Io(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::Io(format!("redis connect: {e}")))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Run a command, retrying once on failure.
    async fn retry_once<T, Fut>(
        &self,
        op: &'static str,
        make: impl Fn(ConnectionManager) -> Fut,
    ) -> Result<T, CoreError>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        match make(self.conn.clone()).await {
            Ok(value) => Ok(value),
            Err(first) => {
                tracing::warn!(op, error = %first, "queue command failed, retrying once");
                make(self.conn.clone())
                    .await
                    .map_err(|e| CoreError::Io(format!("{op}: {e}")))
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), CoreError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| CoreError::Io(format!("serialize job: {e}")))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(QUEUE_KEY, &payload);
        if let Some(scheduled_at) = job.scheduled_at {
            // A past schedule means "eligible now": no deferral entry.
            if scheduled_at > Utc::now() {
                pipe.zadd(RETRY_SCHEDULE_KEY, job.id.to_string(), scheduled_at.timestamp());
            }
        }

        self.retry_once("enqueue", |mut conn| {
            let pipe = &pipe;
            async move {
                let result: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
                result
            }
        })
        .await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = %job.priority,
            queue = QUEUE_KEY,
            "Job enqueued"
        );
        Ok(())
    }

    async fn dequeue(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<DequeuedJob>, CoreError> {
        let keys = queues.to_vec();
        let popped: Option<(String, String)> = self
            .retry_once("dequeue", |mut conn| {
                let keys = keys.clone();
                async move { conn.brpop(keys, timeout.as_secs_f64()).await }
            })
            .await?;

        let Some((queue, payload)) = popped else {
            return Ok(None);
        };

        let job: Job = serde_json::from_str(&payload)
            .map_err(|e| CoreError::Io(format!("deserialize job: {e}")))?;

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, %queue, "Job dequeued");
        Ok(Some(DequeuedJob { job, queue }))
    }

    async fn mark_processing(&self, id: Id) -> Result<(), CoreError> {
        let member = id.to_string();
        let score = Utc::now().timestamp();
        self.retry_once("mark_processing", |mut conn| {
            let member = member.clone();
            async move { conn.zadd::<_, _, _, ()>(PROCESSING_SET_KEY, member, score).await }
        })
        .await
    }

    async fn mark_completed(&self, id: Id) -> Result<(), CoreError> {
        let member = id.to_string();
        self.retry_once("mark_completed", |mut conn| {
            let member = member.clone();
            async move { conn.zrem::<_, _, ()>(PROCESSING_SET_KEY, member).await }
        })
        .await
    }

    async fn mark_failed(&self, id: Id, retry_delay: Duration) -> Result<(), CoreError> {
        let member = id.to_string();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.zrem(PROCESSING_SET_KEY, &member);
        if !retry_delay.is_zero() {
            let eligible_at = Utc::now().timestamp() + retry_delay.as_secs() as i64;
            pipe.zadd(RETRY_SCHEDULE_KEY, &member, eligible_at);
        }

        self.retry_once("mark_failed", |mut conn| {
            let pipe = &pipe;
            async move {
                let result: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
                result
            }
        })
        .await
    }

    async fn depth(&self, queue: &str) -> Result<i64, CoreError> {
        let key = queue.to_string();
        self.retry_once("depth", |mut conn| {
            let key = key.clone();
            async move { conn.llen(key).await }
        })
        .await
    }

    async fn processing_ids(&self) -> Result<Vec<Id>, CoreError> {
        let members: Vec<String> = self
            .retry_once("processing_ids", |mut conn| async move {
                conn.zrange(PROCESSING_SET_KEY, 0, -1).await
            })
            .await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }
}
