//! Session orchestration: issuance, refresh rotation, logout.

use crate::error::AuthError;
use crate::issuer::{AccessIdentity, TokenIssuer};
use crate::metrics;
use crate::notify::{spawn_ip_change, IpChangeEvent, Notifier};
use crate::refresh::{NewSession, RefreshSession, RefreshTokenGenerator, User};
use crate::storage::{RotationOutcome, SessionStore};
use crate::theft::{RevocationReason, TheftDetector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Client context sent with every issue and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// `User-Agent` of the caller
    pub user_agent: String,
    /// Caller IP
    pub ip_address: String,
}

impl SessionMetadata {
    /// Create metadata.
    #[must_use]
    pub fn new(user_agent: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ip_address: ip_address.into(),
        }
    }
}

/// Credentials returned by issuance and refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Signed access token
    pub access_token: String,
    /// `selector.verifier`; shown to the client once
    pub refresh_token: String,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_expires_at", &self.access_expires_at)
            .finish_non_exhaustive()
    }
}

/// Coordinates the issuer, the session store and theft detection.
pub struct AuthService {
    issuer: Arc<TokenIssuer>,
    sessions: Arc<dyn SessionStore>,
    theft: TheftDetector,
    notifier: Arc<dyn Notifier>,
    refresh_ttl: chrono::Duration,
}

impl AuthService {
    /// Create the service.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `refresh_ttl` is out of range.
    pub fn new(
        issuer: Arc<TokenIssuer>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        refresh_ttl: Duration,
    ) -> Result<Self, AuthError> {
        let refresh_ttl = chrono::Duration::from_std(refresh_ttl)
            .map_err(|e| AuthError::config(format!("refresh token TTL out of range: {e}")))?;

        Ok(Self {
            theft: TheftDetector::new(sessions.clone()),
            issuer,
            sessions,
            notifier,
            refresh_ttl,
        })
    }

    /// Token issuer in use.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Issue a fresh pair for the user identified by `guid`, creating the
    /// user on first sight.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an empty guid; randomness, signing and store
    /// failures.
    #[instrument(skip(self, metadata), fields(ip = %metadata.ip_address))]
    pub async fn issue_tokens(
        &self,
        guid: &str,
        metadata: &SessionMetadata,
    ) -> Result<TokenPair, AuthError> {
        if guid.trim().is_empty() {
            return Err(AuthError::InvalidRequest("guid must not be empty".into()));
        }

        let jti = self.issuer.new_jti()?;
        let refresh = self.issuer.create_refresh_token()?;
        let session = self.new_session(0, &refresh.selector, &refresh.verifier_hash, &jti, metadata);

        let user = self.sessions.issue_tokens_tx(guid, session).await?;
        let access = self.issuer.create_access_token_with_jti(user.id, &jti)?;

        metrics::record_tokens_issued("login");
        info!(user_id = user.id, "issued token pair");

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token.to_string(),
            access_expires_at: access.expires_at,
        })
    }

    /// Exchange a refresh token (with its paired, possibly expired, access
    /// token) for a new pair.
    ///
    /// # Errors
    ///
    /// See [`AuthError`]; `TheftDetected` and `UserAgentMismatch` are only
    /// returned after every session of the user was revoked.
    #[instrument(skip_all, fields(ip = %metadata.ip_address))]
    pub async fn refresh_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
        metadata: &SessionMetadata,
    ) -> Result<TokenPair, AuthError> {
        let result = self.rotate(access_token, refresh_token, metadata).await;
        match &result {
            Ok(_) => metrics::record_refresh("rotated"),
            Err(e) => {
                metrics::record_refresh(e.code().as_str());
                if e.is_security_event() {
                    warn!(error = %e, "refresh rejected with security event");
                } else {
                    debug!(error = %e, "refresh rejected");
                }
            }
        }
        result
    }

    async fn rotate(
        &self,
        access_token: &str,
        refresh_token: &str,
        metadata: &SessionMetadata,
    ) -> Result<TokenPair, AuthError> {
        let presented_jti = self.issuer.extract_unverified_claims(access_token)?.jti;

        let parts = RefreshTokenGenerator::split(refresh_token)?;
        let Some(session) = self
            .sessions
            .get_active_session_by_selector(parts.selector)
            .await?
        else {
            return Err(self.theft.inspect_miss(parts.selector).await);
        };

        if session.access_token_jti != presented_jti {
            return Err(AuthError::TokenPairMismatch);
        }

        let now = self.issuer.now();
        if session.is_expired_at(now) {
            if let Err(e) = self.sessions.delete_session(&session.selector).await {
                warn!(session_id = session.id, error = %e, "failed to delete expired session");
            }
            return Err(AuthError::TokenExpired);
        }

        if session.user_agent != metadata.user_agent {
            warn!(user_id = session.user_id, "user agent changed on refresh");
            self.theft
                .revoke_all(session.user_id, RevocationReason::UserAgentMismatch)
                .await;
            return Err(AuthError::UserAgentMismatch);
        }

        if session.ip_address != metadata.ip_address {
            self.notify_ip_change(&session, metadata);
        }

        self.issuer
            .validate_refresh_token(refresh_token, &session.verifier_hash)?;

        let jti = self.issuer.new_jti()?;
        let refresh = self.issuer.create_refresh_token()?;
        let access = self.issuer.create_access_token_with_jti(session.user_id, &jti)?;
        let next = self.new_session(
            session.user_id,
            &refresh.selector,
            &refresh.verifier_hash,
            &jti,
            metadata,
        );

        match self
            .sessions
            .rotate_tokens_tx(&session.selector, next, session.user_id)
            .await?
        {
            RotationOutcome::Rotated(user) => {
                metrics::record_tokens_issued("refresh");
                info!(user_id = user.id, "rotated refresh session");
                Ok(TokenPair {
                    access_token: access.token,
                    refresh_token: refresh.token.to_string(),
                    access_expires_at: access.expires_at,
                })
            }
            RotationOutcome::AlreadyUsed => {
                warn!(user_id = session.user_id, "lost rotation race, treating as reuse");
                self.theft
                    .revoke_all(session.user_id, RevocationReason::RotationRace)
                    .await;
                Err(AuthError::TheftDetected)
            }
        }
    }

    /// Revoke `access_token` and delete every session of its user.
    ///
    /// # Errors
    ///
    /// Any validation error of the token, including `TokenRevoked` on a
    /// second logout; store failures.
    #[instrument(skip_all)]
    pub async fn logout(&self, access_token: &str) -> Result<u64, AuthError> {
        let identity = self.issuer.validate_access_token(access_token).await?;

        if !self
            .issuer
            .revoke_access_token(access_token, identity.expires_at)
            .await?
        {
            return Err(AuthError::TokenRevoked);
        }
        let count = self
            .sessions
            .delete_all_user_sessions(identity.user_id)
            .await?;

        metrics::record_sessions_revoked(RevocationReason::Logout.as_str(), count);
        info!(user_id = identity.user_id, count, "logged out");
        Ok(count)
    }

    /// Bearer check for protected operations.
    ///
    /// # Errors
    ///
    /// Any access token validation error.
    pub async fn authenticate(&self, access_token: &str) -> Result<AccessIdentity, AuthError> {
        self.issuer.validate_access_token(access_token).await
    }

    /// User behind a valid access token.
    ///
    /// # Errors
    ///
    /// Validation errors, or `TokenInvalid` if the user no longer exists.
    pub async fn current_user(&self, access_token: &str) -> Result<User, AuthError> {
        let identity = self.authenticate(access_token).await?;
        self.sessions
            .get_user_by_id(identity.user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)
    }

    /// Delete expired sessions.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn purge_expired_sessions(&self) -> Result<u64, AuthError> {
        let purged = self.sessions.purge_expired_sessions(self.issuer.now()).await?;
        if purged > 0 {
            metrics::record_sessions_revoked("expired", purged);
            debug!(purged, "purged expired sessions");
        }
        Ok(purged)
    }

    fn new_session(
        &self,
        user_id: i64,
        selector: &str,
        verifier_hash: &str,
        jti: &str,
        metadata: &SessionMetadata,
    ) -> NewSession {
        let now = self.issuer.now();
        NewSession {
            user_id,
            selector: selector.to_string(),
            verifier_hash: verifier_hash.to_string(),
            user_agent: metadata.user_agent.clone(),
            ip_address: metadata.ip_address.clone(),
            access_token_jti: jti.to_string(),
            created_at: now,
            expires_at: now + self.refresh_ttl,
        }
    }

    fn notify_ip_change(&self, session: &RefreshSession, metadata: &SessionMetadata) {
        info!(user_id = session.user_id, "refresh from new IP address");
        let event = IpChangeEvent {
            user_id: session.user_id,
            old_ip: session.ip_address.clone(),
            new_ip: metadata.ip_address.clone(),
            user_agent: metadata.user_agent.clone(),
        };
        drop(spawn_ip_change(self.notifier.clone(), event));
    }
}
