//! In-memory store implementations.
//!
//! These mirror the query contracts of the Postgres repositories (ordering,
//! scheduled visibility, soft deletes, attempt accounting) so the worker
//! pool, session engine, and broker bridge can be exercised without a
//! database. They back the test suites and are useful for local tooling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::types::{Id, Timestamp};
use conveyor_core::CoreError;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::models::session::{CreateSession, Session};
use crate::models::user::{CreateUser, User};

use super::job::JobStore;
use super::session::SessionStore;
use super::user::UserStore;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Id, Job>>,
    fail_creates: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail with an I/O error. Lets tests
    /// drive the transient-failure paths of the manager and broker bridge.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of a job row, including soft-deleted rows.
    pub fn raw(&self, id: Id) -> Option<Job> {
        self.jobs.read().unwrap().get(&id).cloned()
    }

    fn with_live_job<T>(
        &self,
        id: Id,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, CoreError> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&id).filter(|j| j.deleted_at.is_none()) {
            Some(job) => Ok(f(job)),
            None => Err(CoreError::NotFound { entity: "job", id }),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(CoreError::Io("injected create failure".into()));
        }
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(CoreError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Id) -> Result<Job, CoreError> {
        self.jobs
            .read()
            .unwrap()
            .get(&id)
            .filter(|j| j.deleted_at.is_none())
            .cloned()
            .ok_or(CoreError::NotFound { entity: "job", id })
    }

    async fn find_by_broker_message_id(&self, message_id: &str) -> Result<Job, CoreError> {
        self.jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.deleted_at.is_none())
            .find(|j| {
                j.payload
                    .pointer("/_meta/broker/message_id")
                    .and_then(|v| v.as_str())
                    == Some(message_id)
            })
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "job",
                id: Uuid::nil(),
            })
    }

    async fn update_status(
        &self,
        id: Id,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.status = status;
            job.error = error.map(str::to_owned);
            job.updated_at = Utc::now();
        })
    }

    async fn set_started_at(&self, id: Id, started_at: Timestamp) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.started_at = Some(started_at);
            job.updated_at = Utc::now();
        })
    }

    async fn set_completed_at(&self, id: Id, completed_at: Timestamp) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.completed_at = Some(completed_at);
            job.updated_at = Utc::now();
        })
    }

    async fn increment_attempts(&self, id: Id) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.attempts += 1;
            job.updated_at = Utc::now();
        })
    }

    async fn to_processing(&self, id: Id, started_at: Timestamp) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(started_at);
            job.updated_at = Utc::now();
        })
    }

    async fn to_completed(&self, id: Id, completed_at: Timestamp) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.status = JobStatus::Completed;
            job.completed_at = Some(completed_at);
            job.error = None;
            job.updated_at = Utc::now();
        })
    }

    async fn to_failed(&self, id: Id, error: &str) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_owned());
            job.attempts += 1;
            job.updated_at = Utc::now();
        })
    }

    async fn to_retrying(&self, id: Id, error: &str) -> Result<(), CoreError> {
        self.with_live_job(id, |job| {
            job.status = JobStatus::Retrying;
            job.error = Some(error.to_owned());
            job.attempts += 1;
            job.updated_at = Utc::now();
        })
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Job>, CoreError> {
        let now = Utc::now();
        let mut pending: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.deleted_at.is_none() && j.status == JobStatus::Pending && j.is_due(now))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, CoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.deleted_at.is_none() && j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn list_retryable(&self, before: Timestamp, limit: i64) -> Result<Vec<Job>, CoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| {
                j.deleted_at.is_none()
                    && matches!(j.status, JobStatus::Failed | JobStatus::Retrying)
                    && j.attempts < j.max_attempts
                    && j.updated_at < before
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.updated_at.cmp(&b.updated_at))
        });
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<Vec<Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-revoked, non-deleted) sessions for a user.
    pub fn active_sessions(&self, user_id: Id) -> usize {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id && !s.revoked && s.deleted_at.is_none())
            .count()
    }

    fn revoke_where(&self, predicate: impl Fn(&Session) -> bool) {
        let now = Utc::now();
        for session in self.sessions.write().unwrap().iter_mut() {
            if session.deleted_at.is_none() && predicate(session) {
                session.revoked = true;
                session.deleted_at = Some(now);
            }
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &CreateSession) -> Result<Session, CoreError> {
        self.revoke_where(|s| s.token_hash == session.token_hash);
        self.revoke_where(|s| s.user_id == session.user_id);

        let created = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            token_hash: session.token_hash.clone(),
            revoked: false,
            expires_at: session.expires_at,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.sessions.write().unwrap().push(created.clone());
        Ok(created)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Session, CoreError> {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .find(|s| s.token_hash == token_hash && s.deleted_at.is_none())
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "session",
                id: Uuid::nil(),
            })
    }

    async fn revoke_by_token_hash(&self, token_hash: &str) -> Result<(), CoreError> {
        self.revoke_where(|s| s.token_hash == token_hash);
        Ok(())
    }

    async fn revoke_by_user(&self, user_id: Id) -> Result<(), CoreError> {
        self.revoke_where(|s| s.user_id == user_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// In-memory [`UserStore`].
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Id, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_where(&self, predicate: impl Fn(&User) -> bool) -> Option<User> {
        self.users
            .read()
            .unwrap()
            .values()
            .filter(|u| u.deleted_at.is_none())
            .find(|u| predicate(u))
            .cloned()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: &CreateUser) -> Result<User, CoreError> {
        if self.find_where(|u| u.username == user.username).is_some() {
            return Err(CoreError::Conflict(format!(
                "username {} already exists",
                user.username
            )));
        }
        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role.clone(),
            email_verified: false,
            phone_verified: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.users.write().unwrap().insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Id) -> Result<User, CoreError> {
        self.find_where(|u| u.id == id)
            .ok_or(CoreError::NotFound { entity: "user", id })
    }

    async fn find_by_email(&self, email: &str) -> Result<User, CoreError> {
        self.find_where(|u| u.email.as_deref() == Some(email))
            .ok_or(CoreError::NotFound {
                entity: "user",
                id: Uuid::nil(),
            })
    }

    async fn find_by_username(&self, username: &str) -> Result<User, CoreError> {
        self.find_where(|u| u.username == username)
            .ok_or(CoreError::NotFound {
                entity: "user",
                id: Uuid::nil(),
            })
    }

    async fn update_last_login_at(&self, id: Id, at: Timestamp) -> Result<(), CoreError> {
        let mut users = self.users.write().unwrap();
        match users.get_mut(&id).filter(|u| u.deleted_at.is_none()) {
            Some(user) => {
                user.last_login_at = Some(at);
                user.updated_at = Utc::now();
                Ok(())
            }
            None => Err(CoreError::NotFound { entity: "user", id }),
        }
    }
}
