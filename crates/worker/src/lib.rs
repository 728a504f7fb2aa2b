//! Job execution engine: handler registry, worker pool, retry scheduler,
//! and the job manager façade that admits new work.

pub mod handler;
pub mod handlers;
pub mod manager;
pub mod pool;
pub mod retry;
pub mod stats;

pub use handler::{HandlerRegistry, JobHandler};
pub use manager::{CreateJobRequest, JobManager};
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use retry::{RetryScheduler, RetrySchedulerConfig};
pub use stats::{PoolStats, SharedStats};
