//! Refresh-token session model.

use conveyor_core::types::{Id, Timestamp};
use sqlx::FromRow;

/// A row from the `sessions` table.
///
/// `token_hash` is the SHA-256 hex digest of the opaque refresh handle;
/// the handle itself is never persisted. Revocation is a soft delete so
/// revoked rows remain inspectable.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Id,
    pub user_id: Id,
    pub token_hash: String,
    pub revoked: bool,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

/// Input for creating a new session row.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub user_id: Id,
    pub token_hash: String,
    pub expires_at: Timestamp,
}
