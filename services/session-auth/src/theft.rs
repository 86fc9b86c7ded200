//! Refresh token reuse detection and mass revocation.

use crate::error::AuthError;
use crate::metrics;
use crate::storage::SessionStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Why every session of a user is being revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    /// A used refresh token was presented again
    RefreshReuse,
    /// A concurrent refresh won the rotation race
    RotationRace,
    /// Refresh from a different user agent
    UserAgentMismatch,
    /// User logged out
    Logout,
}

impl RevocationReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshReuse => "refresh_reuse",
            Self::RotationRace => "rotation_race",
            Self::UserAgentMismatch => "user_agent_mismatch",
            Self::Logout => "logout",
        }
    }

    const fn is_security_event(self) -> bool {
        !matches!(self, Self::Logout)
    }
}

/// Decides what an active-lookup miss means and performs mass revocation.
#[derive(Clone)]
pub struct TheftDetector {
    sessions: Arc<dyn SessionStore>,
}

impl TheftDetector {
    /// Create a detector over `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Classify a selector with no active session.
    ///
    /// A session that exists but is used means the token was replayed: every
    /// session of its owner is revoked and `TheftDetected` is returned. No
    /// session at all yields `SessionNotFound`.
    pub async fn inspect_miss(&self, selector: &str) -> AuthError {
        match self.sessions.find_session_by_selector(selector).await {
            Ok(Some(session)) if !session.is_active() => {
                warn!(
                    user_id = session.user_id,
                    session_id = session.id,
                    "refresh token reuse detected"
                );
                self.revoke_all(session.user_id, RevocationReason::RefreshReuse).await;
                AuthError::TheftDetected
            }
            Ok(_) => AuthError::SessionNotFound,
            Err(e) => e,
        }
    }

    /// Delete every session of `user_id`.
    ///
    /// Failures are logged and swallowed; callers still report the security
    /// error that triggered the revocation.
    pub async fn revoke_all(&self, user_id: i64, reason: RevocationReason) {
        if reason.is_security_event() {
            metrics::record_security_event(reason.as_str());
        }

        match self.sessions.delete_all_user_sessions(user_id).await {
            Ok(count) => {
                metrics::record_sessions_revoked(reason.as_str(), count);
                info!(user_id, count, reason = reason.as_str(), "revoked all user sessions");
            }
            Err(e) => {
                error!(
                    user_id,
                    reason = reason.as_str(),
                    error = %e,
                    "failed to revoke user sessions"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::NewSession;
    use crate::storage::InMemorySessionStore;
    use chrono::{Duration, Utc};

    fn session(selector: &str) -> NewSession {
        let now = Utc::now();
        NewSession {
            user_id: 0,
            selector: selector.into(),
            verifier_hash: "h".into(),
            user_agent: "ua".into(),
            ip_address: "ip".into(),
            access_token_jti: "j".into(),
            created_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_unknown_selector_is_not_found() {
        let store = Arc::new(InMemorySessionStore::new());
        let detector = TheftDetector::new(store);

        assert!(matches!(
            detector.inspect_miss("nope").await,
            AuthError::SessionNotFound
        ));
    }

    #[tokio::test]
    async fn test_used_selector_revokes_everything() {
        let store = Arc::new(InMemorySessionStore::new());
        let user = store.issue_tokens_tx("guid", session("a")).await.unwrap();
        store.issue_tokens_tx("guid", session("b")).await.unwrap();
        store.mark_session_used("a").await.unwrap();

        let detector = TheftDetector::new(store.clone());
        assert!(matches!(detector.inspect_miss("a").await, AuthError::TheftDetected));
        assert_eq!(store.user_session_count(user.id).await, 0);
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(RevocationReason::RefreshReuse.as_str(), "refresh_reuse");
        assert!(RevocationReason::UserAgentMismatch.is_security_event());
        assert!(!RevocationReason::Logout.is_security_event());
    }
}
