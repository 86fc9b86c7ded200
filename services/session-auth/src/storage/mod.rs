//! Session, user and revocation storage.
//!
//! [`SessionStore`] is the durable contract for users and refresh sessions.
//! Its two transactional operations are indivisible in every backend: an
//! observer sees either nothing or the complete result.

pub mod memory;
pub mod postgres;
pub mod redis;
pub mod revocation;

use crate::error::AuthError;
use crate::refresh::{NewSession, RefreshSession, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use self::memory::InMemorySessionStore;
pub use self::postgres::PgSessionStore;
pub use self::redis::RedisKeyedStore;
pub use self::revocation::KeyedRevocationStore;

/// Result of [`SessionStore::rotate_tokens_tx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Old session marked used, new session inserted
    Rotated(User),
    /// Old session was no longer active; nothing was written
    AlreadyUsed,
}

/// Durable store for users and refresh sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get-or-create the user for `guid`, attach its id to `session`, insert
    /// the session and return the user, as one transaction.
    async fn issue_tokens_tx(&self, guid: &str, session: NewSession) -> Result<User, AuthError>;

    /// Mark `old_selector` used if it is still active, insert `new_session`
    /// and fetch `user_id`, as one transaction.
    async fn rotate_tokens_tx(
        &self,
        old_selector: &str,
        new_session: NewSession,
        user_id: i64,
    ) -> Result<RotationOutcome, AuthError>;

    /// Active session for `selector`.
    async fn get_active_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AuthError>;

    /// Session for `selector` in any status.
    async fn find_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AuthError>;

    /// Delete every session of `user_id`, returning how many were removed.
    async fn delete_all_user_sessions(&self, user_id: i64) -> Result<u64, AuthError>;

    /// Insert a session outside any issuance flow.
    async fn create_session(&self, session: NewSession) -> Result<RefreshSession, AuthError>;

    /// Transition `selector` from active to used. Returns whether it changed.
    async fn mark_session_used(&self, selector: &str) -> Result<bool, AuthError>;

    /// Delete one session. Returns whether it existed.
    async fn delete_session(&self, selector: &str) -> Result<bool, AuthError>;

    /// Get-or-create the user for `guid`.
    async fn create_or_get_user(&self, guid: &str) -> Result<User, AuthError>;

    /// User by internal id.
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AuthError>;

    /// Delete sessions whose expiry is at or before `now`.
    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Blacklist of logged-out access tokens.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Blacklist `token` for `ttl`.
    ///
    /// Returns `false`, writing nothing, if `token` is already blacklisted;
    /// of two concurrent calls exactly one returns `true`.
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<bool, AuthError>;

    /// Whether `token` is blacklisted.
    async fn is_revoked(&self, token: &str) -> Result<bool, AuthError>;
}
