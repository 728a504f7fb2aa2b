//! Environment-driven configuration for the worker daemon.
//!
//! Every knob has a development-friendly default; out-of-range values are
//! clamped to the broker's documented limits and logged.

use std::time::Duration;

use conveyor_broker::BrokerConfig;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of parallel workers (>= 1).
    pub pool_size: usize,
    /// How often the health monitor logs the pool stats snapshot.
    pub health_monitor_interval: Duration,
}

/// Full daemon configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub redis_url: String,
    pub worker: WorkerSettings,
    pub broker: BrokerConfig,
}

impl Settings {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                                 | Default                  |
    /// |-----------------------------------------|--------------------------|
    /// | `DATABASE_URL`                          | **required**             |
    /// | `REDIS_URL`                             | `redis://127.0.0.1:6379` |
    /// | `WORKER_POOL_SIZE`                      | `2`                      |
    /// | `WORKER_HEALTH_MONITOR_INTERVAL_SECS`   | `120`                    |
    /// | `BROKER_STREAMS` (comma-separated)      | `events:jobs`            |
    /// | `BROKER_GROUP`                          | `conveyor`               |
    /// | `BROKER_WORKERS_PER_STREAM`             | `1`                      |
    /// | `BROKER_MAX_MESSAGES` (1-10)            | `10`                     |
    /// | `BROKER_WAIT_TIME_SECS` (0-20)          | `5`                      |
    /// | `BROKER_VISIBILITY_TIMEOUT_SECS` (0-43200) | `30`                  |
    /// | `BROKER_POLLING_INTERVAL_SECS`          | `5`                      |
    ///
    /// # Panics
    ///
    /// Panics if `DATABASE_URL` is not set.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let pool_size = env_u64("WORKER_POOL_SIZE", 2).max(1) as usize;
        let health_monitor_interval =
            Duration::from_secs(env_u64("WORKER_HEALTH_MONITOR_INTERVAL_SECS", 120).max(1));

        let streams: Vec<String> = std::env::var("BROKER_STREAMS")
            .unwrap_or_else(|_| "events:jobs".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let group = std::env::var("BROKER_GROUP").unwrap_or_else(|_| "conveyor".into());

        let broker = BrokerConfig {
            streams,
            group,
            workers_per_stream: env_u64("BROKER_WORKERS_PER_STREAM", 1).max(1) as usize,
            max_messages: clamp("BROKER_MAX_MESSAGES", env_u64("BROKER_MAX_MESSAGES", 10), 1, 10)
                as usize,
            wait_time: Duration::from_secs(clamp(
                "BROKER_WAIT_TIME_SECS",
                env_u64("BROKER_WAIT_TIME_SECS", 5),
                0,
                20,
            )),
            visibility_timeout: Duration::from_secs(clamp(
                "BROKER_VISIBILITY_TIMEOUT_SECS",
                env_u64("BROKER_VISIBILITY_TIMEOUT_SECS", 30),
                0,
                43_200,
            )),
            polling_interval: Duration::from_secs(env_u64("BROKER_POLLING_INTERVAL_SECS", 5)),
            shutdown_grace: Duration::from_secs(30),
        };

        Self {
            database_url,
            redis_url,
            worker: WorkerSettings {
                pool_size,
                health_monitor_interval,
            },
            broker,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn clamp(name: &str, value: u64, min: u64, max: u64) -> u64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!(var = name, value, clamped, "Value out of range, clamped");
    }
    clamped
}
