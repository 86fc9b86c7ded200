use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal numeric id, carried in access tokens
    pub id: i64,
    /// Public identifier supplied by the caller at first issuance
    pub public_guid: String,
}

/// Refresh session lifecycle state.
///
/// Transitions only `Active -> Used`, and only through rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Refresh token may be exchanged
    Active,
    /// Refresh token was already exchanged; presenting it again is theft
    Used,
}

impl SessionStatus {
    /// Column value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            other => Err(AuthError::internal(format!("unknown session status: {other}"))),
        }
    }
}

/// Stored refresh session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    /// Store-assigned id
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Public lookup half of the refresh token
    pub selector: String,
    /// Digest of the secret half
    pub verifier_hash: String,
    /// User agent at issuance
    pub user_agent: String,
    /// Client IP at issuance
    pub ip_address: String,
    /// Jti of the access token minted alongside
    pub access_token_jti: String,
    /// Lifecycle state
    pub status: SessionStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Hard expiry of the refresh token
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Whether the session may still be exchanged at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the session is still exchangeable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Session to be inserted. The store assigns `id` and, during issuance,
/// the owning `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Owning user; ignored by `issue_tokens_tx`, which resolves it itself
    pub user_id: i64,
    /// Public lookup half of the refresh token
    pub selector: String,
    /// Digest of the secret half
    pub verifier_hash: String,
    /// User agent of the caller
    pub user_agent: String,
    /// IP of the caller
    pub ip_address: String,
    /// Jti of the paired access token
    pub access_token_jti: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Hard expiry
    pub expires_at: DateTime<Utc>,
}

impl NewSession {
    /// Materialise as an active session with the given id.
    #[must_use]
    pub fn into_session(self, id: i64) -> RefreshSession {
        RefreshSession {
            id,
            user_id: self.user_id,
            selector: self.selector,
            verifier_hash: self.verifier_hash,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            access_token_jti: self.access_token_jti,
            status: SessionStatus::Active,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
