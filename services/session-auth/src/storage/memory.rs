//! In-memory session store for tests and single-instance deployments.
//!
//! Users and sessions live behind one lock. Every operation, including the
//! two transactional ones, runs to completion inside a single guard scope
//! without awaiting, so a cancelled caller can never leave it half-applied.

use super::{RotationOutcome, SessionStore};
use crate::error::AuthError;
use crate::refresh::{NewSession, RefreshSession, SessionStatus, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// In-memory [`SessionStore`].
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    data: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, User>,
    user_ids_by_guid: HashMap<String, i64>,
    /// Sessions keyed by selector
    sessions: HashMap<String, RefreshSession>,
    next_user_id: i64,
    next_session_id: i64,
}

impl MemoryState {
    fn user_for_guid(&mut self, guid: &str) -> User {
        if let Some(user) = self
            .user_ids_by_guid
            .get(guid)
            .and_then(|id| self.users.get(id))
        {
            return user.clone();
        }

        self.next_user_id += 1;
        let user = User {
            id: self.next_user_id,
            public_guid: guid.to_string(),
        };
        self.user_ids_by_guid.insert(guid.to_string(), user.id);
        self.users.insert(user.id, user.clone());
        user
    }

    fn ensure_selector_free(&self, selector: &str) -> Result<(), AuthError> {
        if self.sessions.contains_key(selector) {
            return Err(AuthError::internal("duplicate refresh selector"));
        }
        Ok(())
    }

    fn insert_session(&mut self, session: NewSession) -> RefreshSession {
        self.next_session_id += 1;
        let stored = session.into_session(self.next_session_id);
        self.sessions.insert(stored.selector.clone(), stored.clone());
        stored
    }
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held, in any status.
    pub async fn session_count(&self) -> usize {
        self.data.read().await.sessions.len()
    }

    /// Number of sessions held for one user.
    pub async fn user_session_count(&self, user_id: i64) -> usize {
        self.data
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    #[instrument(skip(self, session), fields(selector = %session.selector))]
    async fn issue_tokens_tx(&self, guid: &str, mut session: NewSession) -> Result<User, AuthError> {
        let mut state = self.data.write().await;

        state.ensure_selector_free(&session.selector)?;
        let user = state.user_for_guid(guid);
        session.user_id = user.id;
        state.insert_session(session);

        Ok(user)
    }

    #[instrument(skip(self, new_session), fields(new_selector = %new_session.selector))]
    async fn rotate_tokens_tx(
        &self,
        old_selector: &str,
        mut new_session: NewSession,
        user_id: i64,
    ) -> Result<RotationOutcome, AuthError> {
        new_session.user_id = user_id;
        let mut state = self.data.write().await;

        // All checks precede the first mutation.
        let still_active = state
            .sessions
            .get(old_selector)
            .is_some_and(RefreshSession::is_active);
        if !still_active {
            return Ok(RotationOutcome::AlreadyUsed);
        }
        state.ensure_selector_free(&new_session.selector)?;
        let user = state
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| AuthError::internal(format!("user {user_id} not found during rotation")))?;

        if let Some(old) = state.sessions.get_mut(old_selector) {
            old.status = SessionStatus::Used;
        }
        state.insert_session(new_session);

        Ok(RotationOutcome::Rotated(user))
    }

    async fn get_active_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AuthError> {
        let state = self.data.read().await;
        Ok(state
            .sessions
            .get(selector)
            .filter(|s| s.is_active())
            .cloned())
    }

    async fn find_session_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<RefreshSession>, AuthError> {
        Ok(self.data.read().await.sessions.get(selector).cloned())
    }

    #[instrument(skip(self))]
    async fn delete_all_user_sessions(&self, user_id: i64) -> Result<u64, AuthError> {
        let mut state = self.data.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn create_session(&self, session: NewSession) -> Result<RefreshSession, AuthError> {
        let mut state = self.data.write().await;
        state.ensure_selector_free(&session.selector)?;
        if !state.users.contains_key(&session.user_id) {
            return Err(AuthError::internal(format!(
                "user {} does not exist",
                session.user_id
            )));
        }
        Ok(state.insert_session(session))
    }

    async fn mark_session_used(&self, selector: &str) -> Result<bool, AuthError> {
        let mut state = self.data.write().await;
        match state.sessions.get_mut(selector) {
            Some(session) if session.is_active() => {
                session.status = SessionStatus::Used;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_session(&self, selector: &str) -> Result<bool, AuthError> {
        Ok(self.data.write().await.sessions.remove(selector).is_some())
    }

    async fn create_or_get_user(&self, guid: &str) -> Result<User, AuthError> {
        Ok(self.data.write().await.user_for_guid(guid))
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AuthError> {
        Ok(self.data.read().await.users.get(&id).cloned())
    }

    async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut state = self.data.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - state.sessions.len()) as u64)
    }
}
