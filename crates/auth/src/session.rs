//! Refresh-token session engine: issue, validate, rotate, revoke.

use std::sync::Arc;

use chrono::Utc;
use conveyor_core::CoreError;
use conveyor_db::models::{CreateSession, Session, User};
use conveyor_db::repositories::{SessionStore, UserStore};

use crate::jwt::{self, JwtConfig};
use crate::password;

/// Session-layer failures, surfaced to callers as unauthenticated.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid refresh token")]
    InvalidRefresh,

    #[error("refresh token has been revoked")]
    Revoked,

    #[error("refresh token has expired")]
    Expired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token generation failed: {0}")]
    Token(String),

    #[error(transparent)]
    Store(#[from] CoreError),
}

/// Access + refresh token pair returned by login and refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// The refresh/rotate/revoke flow on top of [`SessionStore`].
///
/// Issuing a session soft-revokes every prior session of the user, so at
/// any time at most one live refresh token exists per user.
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    config: JwtConfig,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        config: JwtConfig,
    ) -> Self {
        Self {
            sessions,
            users,
            config,
        }
    }

    /// Authenticate with email + password and open a session.
    pub async fn login(&self, email: &str, pass: &str) -> Result<TokenPair, SessionError> {
        let user = match self.users.find_by_email(email).await {
            Ok(user) => user,
            Err(CoreError::NotFound { .. }) => return Err(SessionError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        let valid = password::verify_password(pass, &user.password_hash)
            .map_err(|e| SessionError::Token(format!("password verification: {e}")))?;
        if !valid {
            return Err(SessionError::InvalidCredentials);
        }

        if let Err(e) = self.users.update_last_login_at(user.id, Utc::now()).await {
            tracing::warn!(user_id = %user.id, error = %e, "failed to record last login");
        }

        self.issue(&user).await
    }

    /// Issue a fresh token pair and persist the new session.
    ///
    /// The store's insert revokes any prior live session for the user, so
    /// this is also the rotation primitive used by [`refresh`](Self::refresh).
    pub async fn issue(&self, user: &User) -> Result<TokenPair, SessionError> {
        let access = jwt::generate_access_token(user, &self.config)
            .map_err(|e| SessionError::Token(e.to_string()))?;
        let refresh = jwt::generate_refresh_token(user, &self.config)
            .map_err(|e| SessionError::Token(e.to_string()))?;

        self.sessions
            .insert(&CreateSession {
                user_id: user.id,
                token_hash: jwt::hash_handle(&refresh.handle),
                expires_at: refresh.expires_at,
            })
            .await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.config.access_expiration.as_secs() as i64,
        })
    }

    /// Verify a refresh token end to end and return its live session row.
    pub async fn validate(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let claims = jwt::validate_token(refresh_token, &self.config)
            .map_err(|_| SessionError::InvalidRefresh)?;
        let handle = claims
            .refresh_handle
            .filter(|h| !h.is_empty())
            .ok_or(SessionError::InvalidRefresh)?;

        let session = match self
            .sessions
            .find_by_token_hash(&jwt::hash_handle(&handle))
            .await
        {
            Ok(session) => session,
            Err(CoreError::NotFound { .. }) => return Err(SessionError::InvalidRefresh),
            Err(e) => return Err(e.into()),
        };

        if session.revoked {
            return Err(SessionError::Revoked);
        }
        if session.expires_at < Utc::now() {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Rotate: exchange a valid refresh token for a new pair, revoking the
    /// old session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let session = self.validate(refresh_token).await?;

        let user = match self.users.find_by_id(session.user_id).await {
            Ok(user) => user,
            Err(CoreError::NotFound { .. }) => return Err(SessionError::InvalidRefresh),
            Err(e) => return Err(e.into()),
        };

        // Issuing the new session already revokes the user's prior rows;
        // revoking the old hash explicitly keeps the flow self-evident.
        let pair = self.issue(&user).await?;
        self.sessions
            .revoke_by_token_hash(&session.token_hash)
            .await?;
        Ok(pair)
    }

    /// Revoke the session behind a refresh token.
    ///
    /// Accepts expired (but correctly signed) tokens so a client can always
    /// log out; an unknown hash is a no-op.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), SessionError> {
        let claims = jwt::validate_token_allow_expired(refresh_token, &self.config)
            .map_err(|_| SessionError::InvalidRefresh)?;
        let handle = claims
            .refresh_handle
            .filter(|h| !h.is_empty())
            .ok_or(SessionError::InvalidRefresh)?;

        self.sessions
            .revoke_by_token_hash(&jwt::hash_handle(&handle))
            .await?;
        Ok(())
    }

    /// Alias for [`revoke`](Self::revoke); logout invalidates the refresh
    /// token and nothing else.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), SessionError> {
        self.revoke(refresh_token).await
    }
}
