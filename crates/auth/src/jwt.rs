//! HS256 token generation/validation and refresh-handle helpers.
//!
//! Access and refresh tokens share the same claims shape; a refresh token
//! is distinguished by carrying the `refresh_handle` claim, a base64
//! encoding of 256 random bits. Only `sha256_hex(handle)` is persisted.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use conveyor_core::types::{Id, Timestamp};
use conveyor_db::models::User;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length in bytes of the random refresh handle.
const HANDLE_BYTES: usize = 32;

/// Default access token lifetime in seconds (15 minutes).
const DEFAULT_ACCESS_EXPIRATION_SECS: u64 = 900;

/// Default refresh token lifetime in seconds (7 days).
const DEFAULT_REFRESH_EXPIRATION_SECS: u64 = 7 * 24 * 3600;

/// JWT signing configuration.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub secret_key: String,
    pub access_expiration: Duration,
    pub refresh_expiration: Duration,
}

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                       | Required | Default    |
    /// |-------------------------------|----------|------------|
    /// | `JWT_SECRET_KEY`              | **yes**  | --         |
    /// | `JWT_ISSUER`                  | no       | `conveyor` |
    /// | `JWT_ACCESS_EXPIRATION_SECS`  | no       | `900`      |
    /// | `JWT_REFRESH_EXPIRATION_SECS` | no       | `604800`   |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET_KEY` is not set or is empty.
    pub fn from_env() -> Self {
        let secret_key =
            std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set in the environment");
        assert!(!secret_key.is_empty(), "JWT_SECRET_KEY must not be empty");

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "conveyor".into());

        let access_secs: u64 = std::env::var("JWT_ACCESS_EXPIRATION_SECS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRATION_SECS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRATION_SECS must be a valid u64");

        let refresh_secs: u64 = std::env::var("JWT_REFRESH_EXPIRATION_SECS")
            .unwrap_or_else(|_| DEFAULT_REFRESH_EXPIRATION_SECS.to_string())
            .parse()
            .expect("JWT_REFRESH_EXPIRATION_SECS must be a valid u64");

        Self {
            issuer,
            secret_key,
            access_expiration: Duration::from_secs(access_secs),
            refresh_expiration: Duration::from_secs(refresh_secs),
        }
    }
}

/// Claims embedded in every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Id,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    pub email_verified: bool,
    pub phone_verified: bool,
    /// The opaque refresh handle; present only on refresh tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_handle: Option<String>,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Timestamp,
}

/// A freshly signed refresh token with the plaintext handle it carries.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub handle: String,
    pub expires_at: Timestamp,
}

fn build_claims(user: &User, config: &JwtConfig, ttl: Duration, handle: Option<String>) -> Claims {
    let now = Utc::now();
    let expires_at =
        now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
    Claims {
        sub: user.id,
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role.clone(),
        email_verified: user.email_verified,
        phone_verified: user.phone_verified,
        refresh_handle: handle,
        iss: config.issuer.clone(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: expires_at.timestamp(),
    }
}

fn sign(claims: &Claims, config: &JwtConfig) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(), // HS256
        claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
}

/// Generate an access token for the given user.
pub fn generate_access_token(
    user: &User,
    config: &JwtConfig,
) -> Result<AccessToken, jsonwebtoken::errors::Error> {
    let claims = build_claims(user, config, config.access_expiration, None);
    let expires_at = Utc::now() + chrono::Duration::seconds(claims.exp - claims.iat);
    Ok(AccessToken {
        token: sign(&claims, config)?,
        expires_at,
    })
}

/// Generate a refresh token: a fresh 256-bit handle wrapped in a signed
/// JWT. The caller persists `sha256_hex(handle)`, never the handle itself.
pub fn generate_refresh_token(
    user: &User,
    config: &JwtConfig,
) -> Result<RefreshToken, jsonwebtoken::errors::Error> {
    let handle = random_base64(HANDLE_BYTES);
    let claims = build_claims(user, config, config.refresh_expiration, Some(handle.clone()));
    let expires_at = Utc::now() + chrono::Duration::seconds(claims.exp - claims.iat);
    Ok(RefreshToken {
        token: sign(&claims, config)?,
        handle,
        expires_at,
    })
}

/// Validate signature, expiry, and issuer, returning the claims.
pub fn validate_token(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default(); // HS256, validates exp
    validation.set_issuer(&[&config.issuer]);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Validate signature and issuer but tolerate an expired token.
///
/// Revoking a session must work even after the refresh token's own expiry,
/// so the revoke path uses this instead of [`validate_token`].
pub fn validate_token_allow_expired(
    token: &str,
    config: &JwtConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.set_issuer(&[&config.issuer]);
    validation.validate_exp = false;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// SHA-256 hex digest of a refresh handle; the only form ever stored.
pub fn hash_handle(handle: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(handle.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `len` cryptographically random bytes, base64-encoded.
pub fn random_base64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}
