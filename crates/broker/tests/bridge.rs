//! Bus-event admission through the bridge, against the in-memory stores.

use std::sync::Arc;

use conveyor_broker::{Disposition, JobManagerBridge, StreamEntry};
use conveyor_db::models::{JobPriority, JobStatus};
use conveyor_db::repositories::{InMemoryJobStore, JobStore};
use conveyor_queue::{InMemoryJobQueue, JobQueue, QUEUE_KEY};
use conveyor_worker::JobManager;

fn bridge() -> (Arc<InMemoryJobStore>, Arc<InMemoryJobQueue>, JobManagerBridge) {
    let store = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let manager = Arc::new(JobManager::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&queue) as Arc<dyn JobQueue>,
    ));
    (store, queue, JobManagerBridge::new(manager))
}

fn entry(id: &str, body: &str) -> StreamEntry {
    StreamEntry {
        id: id.into(),
        body: body.into(),
        priority: None,
        max_attempts: None,
        source: None,
    }
}

#[tokio::test]
async fn claim_event_becomes_a_pending_job() {
    let (store, queue, bridge) = bridge();

    let disposition = bridge
        .handle_entry(
            "events:jobs",
            &entry(
                "1700000000000-0",
                r#"{"type":"claim","payload":{"user":"ext1","amount":1000.0}}"#,
            ),
        )
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let job = store
        .find_by_broker_message_id("1700000000000-0")
        .await
        .expect("job should be admitted");
    assert_eq!(job.job_type, "init_claim");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.priority, JobPriority::High);
    assert_eq!(job.payload["user"], "ext1");
    assert_eq!(job.payload["amount"], 1000.0);
    assert_eq!(job.payload["_meta"]["broker"]["queue"], "events:jobs");

    assert_eq!(queue.depth(QUEUE_KEY).await.unwrap(), 1);
}

#[tokio::test]
async fn poison_message_is_acknowledged_without_a_job() {
    let (store, queue, bridge) = bridge();

    for body in ["{not json", r#"{"type":"","payload":{}}"#, r#"{"type":"x","payload":3}"#] {
        let disposition = bridge.handle_entry("events:jobs", &entry("1-0", body)).await;
        assert_eq!(disposition, Disposition::Ack, "body: {body}");
    }

    assert!(store.list_by_status(JobStatus::Pending, 10).await.unwrap().is_empty());
    assert_eq!(queue.depth(QUEUE_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn transient_store_failure_leaves_message_for_redelivery() {
    let (store, queue, bridge) = bridge();
    store.set_fail_creates(true);

    let disposition = bridge
        .handle_entry(
            "events:jobs",
            &entry("2-0", r#"{"type":"claim","payload":{"user":"ext2"}}"#),
        )
        .await;
    assert_eq!(disposition, Disposition::Retry);
    assert_eq!(queue.depth(QUEUE_KEY).await.unwrap(), 0);

    // The broker re-delivers; admission now succeeds.
    store.set_fail_creates(false);
    let disposition = bridge
        .handle_entry(
            "events:jobs",
            &entry("2-0", r#"{"type":"claim","payload":{"user":"ext2"}}"#),
        )
        .await;
    assert_eq!(disposition, Disposition::Ack);
    assert!(store.find_by_broker_message_id("2-0").await.is_ok());
}

#[tokio::test]
async fn unknown_event_type_passes_through() {
    let (store, _queue, bridge) = bridge();

    let disposition = bridge
        .handle_entry(
            "events:jobs",
            &entry("3-0", r#"{"type":"payout.requested","payload":{"user":"ext3"}}"#),
        )
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let job = store.find_by_broker_message_id("3-0").await.unwrap();
    assert_eq!(job.job_type, "payout.requested");
    assert_eq!(job.priority, JobPriority::Normal);
}

#[tokio::test]
async fn attributes_flow_into_the_job() {
    let (store, _queue, bridge) = bridge();

    let mut e = entry("4-0", r#"{"type":"kyc.verification","payload":{"user":"ext4"}}"#);
    e.priority = Some("critical".into());
    e.max_attempts = Some(5);

    bridge.handle_entry("events:jobs", &e).await;

    let job = store.find_by_broker_message_id("4-0").await.unwrap();
    assert_eq!(job.job_type, "kyc_verification");
    assert_eq!(job.priority, JobPriority::Critical);
    assert_eq!(job.max_attempts, 5);
}
