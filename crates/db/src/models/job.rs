//! Job entity model and lifecycle enums.

use chrono::Utc;
use conveyor_core::types::{Id, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Execution status of a background job.
///
/// Stored as the `job_status` Postgres enum. `Completed` and `Failed` are
/// terminal; a failed job with remaining attempts is revived by the retry
/// scheduler, which moves it back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job priority, ordered `Low < Normal < High < Critical`.
///
/// Stored as an INTEGER column so `ORDER BY priority DESC` in
/// `list_pending` follows this ordering directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl JobPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }

    /// Parse the lowercase wire form, falling back to `Normal`.
    pub fn parse_or_default(value: &str) -> Self {
        match value {
            "low" => JobPriority::Low,
            "normal" => JobPriority::Normal,
            "high" => JobPriority::High,
            "critical" => JobPriority::Critical,
            _ => JobPriority::Normal,
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `jobs` table.
///
/// The same struct travels through the queue as serialized JSON, so it
/// derives both `Serialize` and `Deserialize`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Id,
    pub job_type: String,
    pub priority: JobPriority,
    /// Arbitrary JSON object. The `_meta.broker` key is reserved for the
    /// broker listener's message provenance.
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    pub error: Option<String>,
    pub scheduled_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

/// Default attempt budget when the caller does not supply one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

impl Job {
    /// Build a fresh `Pending` job with a new id and current timestamps.
    pub fn new(
        job_type: impl Into<String>,
        priority: JobPriority,
        payload: serde_json::Value,
        max_attempts: i32,
        scheduled_at: Option<Timestamp>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            priority,
            payload,
            attempts: 0,
            max_attempts,
            status: JobStatus::Pending,
            error: None,
            scheduled_at,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the job's scheduled time (if any) has arrived.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_matches_escalation() {
        assert!(JobPriority::Low < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::High);
        assert!(JobPriority::High < JobPriority::Critical);
    }

    #[test]
    fn priority_parses_wire_form() {
        assert_eq!(JobPriority::parse_or_default("critical"), JobPriority::Critical);
        assert_eq!(JobPriority::parse_or_default("low"), JobPriority::Low);
        assert_eq!(JobPriority::parse_or_default("bogus"), JobPriority::Normal);
    }

    #[test]
    fn new_job_starts_pending_with_zero_attempts() {
        let job = Job::new(
            "init_claim",
            JobPriority::High,
            serde_json::json!({"user_id": "u1"}),
            DEFAULT_MAX_ATTEMPTS,
            None,
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.error.is_none());
        assert!(job.is_due(Utc::now()));
    }

    #[test]
    fn job_round_trips_through_queue_json() {
        let job = Job::new(
            "kyc_verification",
            JobPriority::Normal,
            serde_json::json!({"document": "passport"}),
            2,
            None,
        );
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.job_type, "kyc_verification");
        assert_eq!(decoded.status, JobStatus::Pending);
        assert_eq!(decoded.priority, JobPriority::Normal);
    }

    #[test]
    fn future_schedule_is_not_due() {
        let job = Job::new(
            "init_claim",
            JobPriority::Normal,
            serde_json::json!({}),
            3,
            Some(Utc::now() + chrono::Duration::minutes(5)),
        );
        assert!(!job.is_due(Utc::now()));
    }
}
