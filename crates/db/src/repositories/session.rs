//! Repository for the `sessions` table.

use async_trait::async_trait;
use conveyor_core::types::Id;
use conveyor_core::CoreError;
use sqlx::PgPool;
use uuid::Uuid;

use super::classify;
use crate::models::session::{CreateSession, Session};

/// Column list shared across `sessions` queries.
const COLUMNS: &str = "id, user_id, token_hash, revoked, expires_at, created_at, deleted_at";

/// Durable refresh-session persistence.
///
/// Revocation is a soft delete (`revoked = true, deleted_at = NOW()`), so
/// revoked rows survive for audit but are invisible to `find_by_token_hash`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session for a user.
    ///
    /// Before inserting, any live row with the same `token_hash` and all of
    /// the user's other live rows are revoked, so after a successful insert
    /// exactly one live session exists for the user.
    async fn insert(&self, session: &CreateSession) -> Result<Session, CoreError>;
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Session, CoreError>;
    async fn revoke_by_token_hash(&self, token_hash: &str) -> Result<(), CoreError>;
    async fn revoke_by_user(&self, user_id: Id) -> Result<(), CoreError>;
}

/// Postgres-backed [`SessionStore`].
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &CreateSession) -> Result<Session, CoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        sqlx::query(
            "UPDATE sessions SET revoked = true, deleted_at = NOW() \
             WHERE token_hash = $1 AND deleted_at IS NULL",
        )
        .bind(&session.token_hash)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        sqlx::query(
            "UPDATE sessions SET revoked = true, deleted_at = NOW() \
             WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(session.user_id)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        let query = format!(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let created = sqlx::query_as::<_, Session>(&query)
            .bind(Uuid::new_v4())
            .bind(session.user_id)
            .bind(&session.token_hash)
            .bind(session.expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;

        tx.commit().await.map_err(classify)?;
        Ok(created)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Session, CoreError> {
        let query =
            format!("SELECT {COLUMNS} FROM sessions WHERE token_hash = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Session>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or(CoreError::NotFound {
                entity: "session",
                id: Uuid::nil(),
            })
    }

    async fn revoke_by_token_hash(&self, token_hash: &str) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE sessions SET revoked = true, deleted_at = NOW() \
             WHERE token_hash = $1 AND deleted_at IS NULL",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn revoke_by_user(&self, user_id: Id) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE sessions SET revoked = true, deleted_at = NOW() \
             WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }
}
