//! Event message wire format and the event-type → job-type mapping.

use conveyor_db::models::JobPriority;
use conveyor_worker::CreateJobRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::stream::StreamEntry;

/// Body of every bus event: `{"type": "<tag>", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// A message that can never be processed; acknowledged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum PoisonError {
    #[error("malformed event body: {0}")]
    Malformed(String),

    #[error("message missing required 'type' field")]
    MissingType,

    #[error("message 'payload' must be an object")]
    InvalidPayload,
}

/// Parse and validate an event body.
pub fn parse_event(body: &str) -> Result<EventMessage, PoisonError> {
    let event: EventMessage =
        serde_json::from_str(body).map_err(|e| PoisonError::Malformed(e.to_string()))?;
    if event.event_type.is_empty() {
        return Err(PoisonError::MissingType);
    }
    if !event.payload.is_object() {
        return Err(PoisonError::InvalidPayload);
    }
    Ok(event)
}

/// Well-known bus event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Claim,
    KycVerification,
}

impl EventType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "claim" => Some(EventType::Claim),
            "kyc.verification" => Some(EventType::KycVerification),
            _ => None,
        }
    }

    pub fn job_type(self) -> &'static str {
        match self {
            EventType::Claim => "init_claim",
            EventType::KycVerification => "kyc_verification",
        }
    }

    pub fn default_priority(self) -> JobPriority {
        match self {
            EventType::Claim | EventType::KycVerification => JobPriority::High,
        }
    }
}

/// Map a bus event tag to a job type and default priority.
///
/// Unknown tags pass through unchanged at normal priority so new event
/// kinds can be consumed by just registering a handler.
pub fn map_event_type(tag: &str) -> (String, JobPriority) {
    match EventType::from_tag(tag) {
        Some(event) => (event.job_type().to_string(), event.default_priority()),
        None => (tag.to_string(), JobPriority::Normal),
    }
}

/// Build the admission request for a validated event.
///
/// Message attributes override the defaults where present, and the broker
/// provenance is injected under the reserved `_meta.broker` payload key.
pub fn build_job_request(event: EventMessage, queue: &str, entry: &StreamEntry) -> CreateJobRequest {
    let (job_type, default_priority) = map_event_type(&event.event_type);

    let priority = entry
        .priority
        .as_deref()
        .map(JobPriority::parse_or_default)
        .unwrap_or(default_priority);

    let mut payload = event.payload;
    payload["_meta"] = json!({
        "broker": {
            "message_id": entry.id,
            "queue": queue,
        }
    });

    CreateJobRequest {
        job_type,
        priority,
        payload: Some(payload),
        max_attempts: entry.max_attempts,
        scheduled_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str) -> StreamEntry {
        StreamEntry {
            id: "1700000000000-0".into(),
            body: body.into(),
            priority: None,
            max_attempts: None,
            source: None,
        }
    }

    #[test]
    fn valid_event_parses() {
        let event = parse_event(r#"{"type":"claim","payload":{"user":"ext1","amount":1000.0}}"#)
            .expect("valid body should parse");
        assert_eq!(event.event_type, "claim");
        assert_eq!(event.payload["user"], "ext1");
    }

    #[test]
    fn garbage_and_missing_fields_are_poison() {
        assert!(matches!(parse_event("not json"), Err(PoisonError::Malformed(_))));
        assert!(matches!(
            parse_event(r#"{"payload":{}}"#),
            Err(PoisonError::Malformed(_) | PoisonError::MissingType)
        ));
        assert!(matches!(
            parse_event(r#"{"type":"","payload":{}}"#),
            Err(PoisonError::MissingType)
        ));
        assert!(matches!(
            parse_event(r#"{"type":"claim","payload":"flat"}"#),
            Err(PoisonError::InvalidPayload)
        ));
    }

    #[test]
    fn known_event_tags_map_to_job_types() {
        assert_eq!(map_event_type("claim"), ("init_claim".into(), JobPriority::High));
        assert_eq!(
            map_event_type("kyc.verification"),
            ("kyc_verification".into(), JobPriority::High)
        );
    }

    #[test]
    fn unknown_tags_pass_through_at_normal_priority() {
        assert_eq!(
            map_event_type("payout.requested"),
            ("payout.requested".into(), JobPriority::Normal)
        );
    }

    #[test]
    fn request_carries_broker_provenance() {
        let event = parse_event(r#"{"type":"claim","payload":{"user":"ext1"}}"#).unwrap();
        let req = build_job_request(event, "events:jobs", &entry(""));

        assert_eq!(req.job_type, "init_claim");
        assert_eq!(req.priority, JobPriority::High);
        let payload = req.payload.unwrap();
        assert_eq!(payload["user"], "ext1");
        assert_eq!(payload["_meta"]["broker"]["message_id"], "1700000000000-0");
        assert_eq!(payload["_meta"]["broker"]["queue"], "events:jobs");
    }

    #[test]
    fn attributes_override_defaults() {
        let event = parse_event(r#"{"type":"claim","payload":{}}"#).unwrap();
        let mut e = entry("");
        e.priority = Some("critical".into());
        e.max_attempts = Some(5);

        let req = build_job_request(event, "events:jobs", &e);
        assert_eq!(req.priority, JobPriority::Critical);
        assert_eq!(req.max_attempts, Some(5));
    }
}
