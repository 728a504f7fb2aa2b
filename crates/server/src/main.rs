mod config;

use std::sync::Arc;
use std::time::Duration;

use conveyor_broker::{BrokerListener, StreamClient};
use conveyor_db::repositories::{JobStore, PgJobStore};
use conveyor_queue::{JobQueue, RedisJobQueue};
use conveyor_worker::handlers::default_registry;
use conveyor_worker::stats::run_health_monitor;
use conveyor_worker::{
    JobManager, RetryScheduler, RetrySchedulerConfig, SharedStats, WorkerPool, WorkerPoolConfig,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Settings;

/// How long shutdown waits for in-flight jobs before giving up.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "conveyor_server=debug,conveyor_worker=debug,conveyor_broker=debug,conveyor_queue=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let settings = Settings::from_env();
    tracing::info!(
        pool_size = settings.worker.pool_size,
        streams = ?settings.broker.streams,
        "Loaded configuration"
    );

    // --- Database ---
    let pool = conveyor_db::create_pool(&settings.database_url)
        .await
        .expect("Failed to connect to database");
    conveyor_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    conveyor_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    // --- Queue + stores ---
    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisJobQueue::connect(&settings.redis_url)
            .await
            .expect("Failed to connect to Redis"),
    );
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    tracing::info!("Queue and job store ready");

    // --- Worker pool ---
    let cancel = CancellationToken::new();
    let stats = Arc::new(SharedStats::new());
    let worker_pool = WorkerPool::new(
        WorkerPoolConfig {
            workers: settings.worker.pool_size,
            ..WorkerPoolConfig::default()
        },
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::new(default_registry()),
        Arc::clone(&stats),
        cancel.clone(),
    );
    worker_pool.start().await;

    // --- Retry scheduler + health monitor ---
    let scheduler = RetryScheduler::new(
        RetrySchedulerConfig::default(),
        Arc::clone(&store),
        Arc::clone(&queue),
    );
    let scheduler_cancel = cancel.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });

    let health_handle = tokio::spawn(run_health_monitor(
        Arc::clone(&stats),
        settings.worker.health_monitor_interval,
        cancel.clone(),
    ));

    // --- Broker listener ---
    let manager = Arc::new(JobManager::new(Arc::clone(&store), Arc::clone(&queue)));
    let stream_client = StreamClient::connect(&settings.redis_url, settings.broker.group.clone())
        .await
        .expect("Failed to connect to Redis streams");
    let listener = BrokerListener::new(
        stream_client,
        settings.broker.clone(),
        manager,
        cancel.clone(),
    );
    listener
        .start()
        .await
        .expect("Failed to start broker listener");

    tracing::info!("Conveyor worker daemon started");

    // --- Run until signalled ---
    shutdown_signal().await;

    // --- Shutdown sequence: listener first (stop taking new work from
    // outside), then the pool (drain in-flight jobs), then the periodic
    // tasks. Each step logs failures and proceeds. ---
    cancel.cancel();

    listener.stop().await;

    if let Err(e) = worker_pool.stop(SHUTDOWN_DEADLINE).await {
        tracing::error!(error = %e, "Worker pool did not drain cleanly");
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    tracing::info!("Background tasks stopped");

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the daemon shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
