//! Postgres persistence layer: connection pool helpers, entity models,
//! and repository implementations.
//!
//! Every durable store is exposed behind a capability trait
//! ([`repositories::JobStore`], [`repositories::SessionStore`],
//! [`repositories::UserStore`]) with a Postgres implementation for
//! production and an in-memory implementation for tests.

pub mod models;
pub mod repositories;

use sqlx::postgres::PgPoolOptions;

/// Convenience alias used across the workspace.
pub type DbPool = sqlx::PgPool;

/// Maximum connections held by the pool.
const MAX_CONNECTIONS: u32 = 10;

/// Create a connection pool for the given database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(database_url)
        .await
}

/// Verify the database is reachable with a trivial round-trip.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply any pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
