use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// User id as a decimal string
    pub uid: String,
    /// Subject, the user id as a decimal string
    pub sub: String,
    /// Token id binding this access token to one refresh session
    pub jti: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

impl AccessClaims {
    /// Claims for `user_id`, valid from `now` for `ttl`.
    #[must_use]
    pub fn new(user_id: i64, jti: impl Into<String>, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        let id = user_id.to_string();
        Self {
            uid: id.clone(),
            sub: id,
            jti: jti.into(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    /// Numeric user id, preferring `uid` and falling back to `sub`.
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        self.uid.parse().ok().or_else(|| self.sub.parse().ok())
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    /// Whether the token is past `exp + leeway_secs` at `now`.
    #[must_use]
    pub const fn is_expired_at(&self, now: i64, leeway_secs: i64) -> bool {
        now > self.exp.saturating_add(leeway_secs)
    }
}
