//! Repository traits and their Postgres / in-memory implementations.

pub mod job;
pub mod memory;
pub mod session;
pub mod user;

pub use job::{JobStore, PgJobStore};
pub use memory::{InMemoryJobStore, InMemorySessionStore, InMemoryUserStore};
pub use session::{PgSessionStore, SessionStore};
pub use user::{PgUserStore, UserStore};

use conveyor_core::CoreError;

/// Translate a sqlx error into the domain taxonomy.
///
/// Unique-constraint violations (Postgres code 23505) become `Conflict`;
/// everything else is a transport-level `Io`. Row absence is handled at
/// the call sites via `fetch_optional`, which carry the entity context.
pub(crate) fn classify(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unknown");
            return CoreError::Conflict(format!(
                "duplicate value violates unique constraint: {constraint}"
            ));
        }
    }
    CoreError::Io(err.to_string())
}
