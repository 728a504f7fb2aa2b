//! Handler for `init_claim` jobs.

use std::time::Duration;

use async_trait::async_trait;
use conveyor_db::models::Job;
use tokio_util::sync::CancellationToken;

use crate::handler::JobHandler;

/// Simulated processing time until the claims backend is wired in.
const PROCESSING_TIME: Duration = Duration::from_millis(200);

/// Opens a claim for the user in the payload.
#[derive(Default)]
pub struct InitClaimHandler;

impl InitClaimHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for InitClaimHandler {
    fn job_type(&self) -> &str {
        "init_claim"
    }

    async fn handle(&self, _cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        tracing::info!(job_id = %job.id, payload = %job.payload, "Processing init claim job");

        tokio::time::sleep(PROCESSING_TIME).await;

        tracing::info!(job_id = %job.id, "Init claim completed");
        Ok(())
    }
}
