//! End-to-end refresh-token flow against the in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use conveyor_auth::{JwtConfig, SessionError, SessionManager};
use conveyor_db::models::CreateUser;
use conveyor_db::repositories::{InMemorySessionStore, InMemoryUserStore, UserStore};

fn test_config() -> JwtConfig {
    JwtConfig {
        issuer: "conveyor-test".into(),
        secret_key: "integration-test-secret-key-0123456789".into(),
        access_expiration: Duration::from_secs(900),
        refresh_expiration: Duration::from_secs(3600),
    }
}

struct Harness {
    sessions: Arc<InMemorySessionStore>,
    users: Arc<InMemoryUserStore>,
    manager: SessionManager,
}

async fn harness() -> Harness {
    let sessions = Arc::new(InMemorySessionStore::new());
    let users = Arc::new(InMemoryUserStore::new());
    let manager = SessionManager::new(
        Arc::clone(&sessions) as Arc<dyn conveyor_db::repositories::SessionStore>,
        Arc::clone(&users) as Arc<dyn UserStore>,
        test_config(),
    );
    Harness {
        sessions,
        users,
        manager,
    }
}

async fn register(h: &Harness, email: &str, password: &str) -> uuid::Uuid {
    let user = h
        .users
        .insert(&CreateUser {
            username: email.to_string(),
            email: Some(email.to_string()),
            password_hash: conveyor_auth::password::hash_password(password).unwrap(),
            role: "user".into(),
        })
        .await
        .unwrap();
    user.id
}

#[tokio::test]
async fn login_issues_distinct_tokens() {
    let h = harness().await;
    register(&h, "a@example.com", "correct-horse").await;

    let pair = h.manager.login("a@example.com", "correct-horse").await.unwrap();
    assert_ne!(pair.access_token, pair.refresh_token);
    assert_eq!(pair.expires_in, 900);
}

#[tokio::test]
async fn login_with_wrong_password_fails() {
    let h = harness().await;
    register(&h, "a@example.com", "correct-horse").await;

    let err = h.manager.login("a@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidCredentials));

    let err = h.manager.login("nobody@example.com", "x").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidCredentials));
}

#[tokio::test]
async fn refresh_rotates_and_invalidates_the_old_token() {
    let h = harness().await;
    register(&h, "a@example.com", "correct-horse").await;

    let first = h.manager.login("a@example.com", "correct-horse").await.unwrap();
    let second = h.manager.refresh(&first.refresh_token).await.unwrap();

    assert_ne!(second.access_token, first.access_token);
    assert_ne!(second.refresh_token, first.refresh_token);

    // The rotated-out token must no longer refresh.
    let err = h.manager.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidRefresh | SessionError::Revoked
    ));

    // The new one still does.
    h.manager.refresh(&second.refresh_token).await.unwrap();
}

#[tokio::test]
async fn logout_invalidates_the_refresh_token() {
    let h = harness().await;
    register(&h, "a@example.com", "correct-horse").await;

    let pair = h.manager.login("a@example.com", "correct-horse").await.unwrap();
    h.manager.logout(&pair.refresh_token).await.unwrap();

    let err = h.manager.refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidRefresh | SessionError::Revoked
    ));
}

#[tokio::test]
async fn at_most_one_live_session_per_user() {
    let h = harness().await;
    let user_id = register(&h, "a@example.com", "correct-horse").await;

    // Repeated logins and refreshes never leave more than one live row.
    let mut pair = h.manager.login("a@example.com", "correct-horse").await.unwrap();
    assert_eq!(h.sessions.active_sessions(user_id), 1);

    for _ in 0..3 {
        pair = h.manager.refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(h.sessions.active_sessions(user_id), 1);
    }

    h.manager.login("a@example.com", "correct-horse").await.unwrap();
    assert_eq!(h.sessions.active_sessions(user_id), 1);

    h.manager.logout(&pair.refresh_token).await.unwrap();
    assert!(h.sessions.active_sessions(user_id) <= 1);
}

#[tokio::test]
async fn garbage_token_is_invalid() {
    let h = harness().await;
    let err = h.manager.refresh("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidRefresh));
}

#[tokio::test]
async fn access_token_cannot_be_used_as_refresh_token() {
    let h = harness().await;
    register(&h, "a@example.com", "correct-horse").await;
    let pair = h.manager.login("a@example.com", "correct-horse").await.unwrap();

    // Correctly signed, but carries no refresh handle.
    let err = h.manager.refresh(&pair.access_token).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidRefresh));
}
