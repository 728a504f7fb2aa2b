//! Handler for `kyc_verification` jobs.

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use conveyor_db::models::Job;
use tokio_util::sync::CancellationToken;

use crate::handler::JobHandler;

/// Simulated verification time until the KYC provider is wired in.
const PROCESSING_TIME: Duration = Duration::from_millis(300);

/// Runs identity verification for the user in the payload.
///
/// Until the real provider integration lands, this fails on even non-zero
/// attempt counts so the retry machinery gets exercised end to end.
#[derive(Default)]
pub struct KycVerificationHandler;

impl KycVerificationHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for KycVerificationHandler {
    fn job_type(&self) -> &str {
        "kyc_verification"
    }

    async fn handle(&self, _cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        tracing::info!(job_id = %job.id, payload = %job.payload, "Processing KYC verification job");

        tokio::time::sleep(PROCESSING_TIME).await;

        if job.attempts > 0 && job.attempts % 2 == 0 {
            tracing::warn!(
                job_id = %job.id,
                attempt = job.attempts,
                "KYC verification failed on this attempt"
            );
            bail!("KYC service temporarily unavailable");
        }

        tracing::info!(job_id = %job.id, "KYC verification completed");
        Ok(())
    }
}
