//! The job handler capability and its type-indexed registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conveyor_db::models::Job;
use tokio_util::sync::CancellationToken;

/// A unit of executable business logic for one job type.
///
/// `handle` is invoked with the pool's root cancellation token so a
/// long-running handler can observe shutdown; it is never forcibly
/// aborted. Any returned error is recorded on the job and routed through
/// the retry machinery.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type tag this handler is registered under.
    fn job_type(&self) -> &str;

    fn can_handle(&self, job_type: &str) -> bool {
        self.job_type() == job_type
    }

    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()>;
}

/// Maps job type tags to handlers.
///
/// Populated once at startup and read-only afterwards, so lookups need no
/// locking. Registering a type twice replaces the earlier handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        tracing::debug!(job_type, "Registered job handler");
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered job type tags.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_db::models::{Job, JobPriority};

    struct Recorder(&'static str);

    #[async_trait]
    impl JobHandler for Recorder {
        fn job_type(&self) -> &str {
            self.0
        }

        async fn handle(&self, _cancel: &CancellationToken, _job: &Job) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lookup_by_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Recorder("init_claim")));
        registry.register(Arc::new(Recorder("kyc_verification")));

        assert!(registry.get("init_claim").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.job_types().len(), 2);
    }

    #[test]
    fn re_registration_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Recorder("init_claim")));
        registry.register(Arc::new(Recorder("init_claim")));
        assert_eq!(registry.job_types().len(), 1);
    }

    #[tokio::test]
    async fn default_can_handle_matches_type() {
        let handler = Recorder("init_claim");
        assert!(handler.can_handle("init_claim"));
        assert!(!handler.can_handle("complete_claim"));

        let job = Job::new("init_claim", JobPriority::Normal, serde_json::json!({}), 3, None);
        handler
            .handle(&CancellationToken::new(), &job)
            .await
            .unwrap();
    }
}
