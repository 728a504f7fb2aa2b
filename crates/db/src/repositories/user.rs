//! Repository for the `users` table.

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::types::{Id, Timestamp};
use conveyor_core::CoreError;
use sqlx::PgPool;
use uuid::Uuid;

use super::classify;
use crate::models::user::{CreateUser, User};

/// Column list shared across `users` queries.
const COLUMNS: &str = "\
    id, username, email, password_hash, role, email_verified, phone_verified, \
    last_login_at, created_at, updated_at, deleted_at";

/// Durable user persistence (the slice the session engine needs).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &CreateUser) -> Result<User, CoreError>;
    async fn find_by_id(&self, id: Id) -> Result<User, CoreError>;
    async fn find_by_email(&self, email: &str) -> Result<User, CoreError>;
    async fn find_by_username(&self, username: &str) -> Result<User, CoreError>;
    async fn update_last_login_at(&self, id: Id, at: Timestamp) -> Result<(), CoreError>;
}

/// Postgres-backed [`UserStore`].
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        condition: &str,
        value: &str,
    ) -> Result<Option<User>, CoreError> {
        let query =
            format!("SELECT {COLUMNS} FROM users WHERE {condition} = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &CreateUser) -> Result<User, CoreError> {
        let query = format!(
            "INSERT INTO users \
                 (id, username, email, password_hash, role, email_verified, phone_verified) \
             VALUES ($1, $2, $3, $4, $5, false, false) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.role)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
    }

    async fn find_by_id(&self, id: Id) -> Result<User, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?
            .ok_or(CoreError::NotFound { entity: "user", id })
    }

    async fn find_by_email(&self, email: &str) -> Result<User, CoreError> {
        self.find_one("email", email).await?.ok_or(CoreError::NotFound {
            entity: "user",
            id: Uuid::nil(),
        })
    }

    async fn find_by_username(&self, username: &str) -> Result<User, CoreError> {
        self.find_one("username", username)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "user",
                id: Uuid::nil(),
            })
    }

    async fn update_last_login_at(&self, id: Id, at: Timestamp) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = $2, updated_at = $3 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound { entity: "user", id });
        }
        Ok(())
    }
}
