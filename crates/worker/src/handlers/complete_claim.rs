//! Handler for `complete_claim` jobs.

use std::time::Duration;

use async_trait::async_trait;
use conveyor_db::models::Job;
use tokio_util::sync::CancellationToken;

use crate::handler::JobHandler;

/// Simulated processing time until the claims backend is wired in.
const PROCESSING_TIME: Duration = Duration::from_millis(200);

/// Settles and closes a previously opened claim.
#[derive(Default)]
pub struct CompleteClaimHandler;

impl CompleteClaimHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for CompleteClaimHandler {
    fn job_type(&self) -> &str {
        "complete_claim"
    }

    async fn handle(&self, _cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        tracing::info!(job_id = %job.id, payload = %job.payload, "Processing complete claim job");

        tokio::time::sleep(PROCESSING_TIME).await;

        tracing::info!(job_id = %job.id, "Complete claim finished");
        Ok(())
    }
}
