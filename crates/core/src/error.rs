use crate::types::Id;

/// Domain error taxonomy shared across the platform.
///
/// These are error *kinds*, not transport types: the db and queue crates
/// translate their driver errors into one of these variants so callers can
/// apply a uniform policy (reject, surface, retry) without matching on
/// sqlx or redis internals.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Caller-supplied input was invalid; nothing was persisted or enqueued.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Id },

    /// A uniqueness violation at the durable layer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient store or broker failure, surfaced after local retry.
    #[error("I/O error: {0}")]
    Io(String),

    /// A deadline expired before the operation completed.
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl CoreError {
    /// True for failures worth retrying at a higher layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Io(_) | CoreError::Timeout(_))
    }
}
