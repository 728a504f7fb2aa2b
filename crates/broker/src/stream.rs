//! Thin Redis Streams client for the event bus.
//!
//! Consumer groups give each listener fleet its own cursor; entries stay
//! pending until XACK'd and can be reclaimed from stalled consumers with
//! XAUTOCLAIM once their idle time passes the visibility timeout.

use std::collections::HashMap;
use std::time::Duration;

use conveyor_core::CoreError;
use redis::aio::ConnectionManager;
use redis::Value;

/// One entry read from a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// The broker-assigned message id.
    pub id: String,
    /// JSON event body.
    pub body: String,
    /// Optional `priority` attribute (lowercase wire form).
    pub priority: Option<String>,
    /// Optional `max_attempts` attribute.
    pub max_attempts: Option<i32>,
    /// Optional `source` attribute (e.g. `"external"`).
    pub source: Option<String>,
}

impl StreamEntry {
    fn from_fields(id: String, mut fields: HashMap<String, String>) -> Option<Self> {
        let body = fields.remove("body")?;
        Some(Self {
            id,
            body,
            priority: fields.remove("priority"),
            max_attempts: fields.remove("max_attempts").and_then(|v| v.parse().ok()),
            source: fields.remove("source"),
        })
    }
}

/// Attributes attached when publishing an event.
#[derive(Debug, Clone, Default)]
pub struct PublishAttributes {
    pub priority: Option<String>,
    pub max_attempts: Option<i32>,
    pub source: Option<String>,
}

/// Stream client bound to one consumer group.
#[derive(Clone)]
pub struct StreamClient {
    conn: ConnectionManager,
    group: String,
}

impl StreamClient {
    pub async fn connect(redis_url: &str, group: impl Into<String>) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoreError::Io(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::Io(format!("redis connect: {e}")))?;
        Ok(Self::from_connection(conn, group))
    }

    pub fn from_connection(conn: ConnectionManager, group: impl Into<String>) -> Self {
        Self {
            conn,
            group: group.into(),
        }
    }

    /// Create the consumer group (and the stream) if missing. Idempotent:
    /// an already-exists reply is not an error.
    pub async fn ensure_group(&self, stream: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(CoreError::Io(format!("XGROUP CREATE {stream}: {e}"))),
        }
    }

    /// Append an event to the stream, returning the assigned message id.
    pub async fn publish(
        &self,
        stream: &str,
        body: &str,
        attrs: &PublishAttributes,
    ) -> Result<String, CoreError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*").arg("body").arg(body);
        if let Some(priority) = &attrs.priority {
            cmd.arg("priority").arg(priority);
        }
        if let Some(max_attempts) = attrs.max_attempts {
            cmd.arg("max_attempts").arg(max_attempts);
        }
        if let Some(source) = &attrs.source {
            cmd.arg("source").arg(source);
        }

        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Io(format!("XADD {stream}: {e}")))
    }

    /// Long-poll for new entries as `consumer`, waiting up to `block`.
    pub async fn read(
        &self,
        stream: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, CoreError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Io(format!("XREADGROUP {stream}: {e}")))?;

        // Reply shape: [[stream, [[id, [field, value, ...]], ...]], ...]
        let Value::Array(streams) = reply else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for stream_reply in streams {
            let (_name, raw_entries): (String, Value) = redis::from_redis_value(&stream_reply)
                .map_err(|e| CoreError::Io(format!("stream reply: {e}")))?;
            entries.extend(parse_entries(&raw_entries)?);
        }
        Ok(entries)
    }

    /// Claim entries that have been pending longer than `min_idle`,
    /// transferring them to `consumer` for re-processing.
    pub async fn claim_stale(
        &self,
        stream: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, CoreError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Io(format!("XAUTOCLAIM {stream}: {e}")))?;

        // Reply shape: [next-cursor, [[id, fields], ...], ...]
        let Value::Array(parts) = reply else {
            return Ok(Vec::new());
        };
        match parts.get(1) {
            Some(raw_entries) => parse_entries(raw_entries),
            None => Ok(Vec::new()),
        }
    }

    /// Acknowledge (and thereby retire) a processed entry.
    pub async fn ack(&self, stream: &str, id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _acked: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Io(format!("XACK {stream} {id}: {e}")))?;
        Ok(())
    }
}

/// Decode `[[id, [k, v, ...]], ...]` into entries, skipping tombstones
/// (XAUTOCLAIM reports deleted entries as nil field lists).
fn parse_entries(raw: &Value) -> Result<Vec<StreamEntry>, CoreError> {
    let Value::Array(items) = raw else {
        return Ok(Vec::new());
    };
    let mut entries = Vec::new();
    for item in items {
        let Value::Array(pair) = item else { continue };
        let Some(id_value) = pair.first() else { continue };
        let id: String = redis::from_redis_value(id_value)
            .map_err(|e| CoreError::Io(format!("entry id: {e}")))?;
        let fields: HashMap<String, String> = match pair.get(1) {
            Some(Value::Nil) | None => continue,
            Some(raw_fields) => redis::from_redis_value(raw_fields)
                .map_err(|e| CoreError::Io(format!("entry fields: {e}")))?,
        };
        if let Some(entry) = StreamEntry::from_fields(id, fields) {
            entries.push(entry);
        }
    }
    Ok(entries)
}
