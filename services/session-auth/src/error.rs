//! Error taxonomy for the session token service.
//!
//! Cryptographic and format failures carry no side effects. Security
//! conditions (`TheftDetected`, `UserAgentMismatch`) are only returned after
//! mass revocation has been attempted. Store failures fail closed here; the
//! rate limiter is the single component that degrades to "allow".

use rust_common::PlatformError;
use thiserror::Error;

/// Service error.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token could not be parsed or split
    #[error("Token malformed: {0}")]
    MalformedToken(String),

    /// Access token or refresh session is past its expiry
    #[error("Token expired")]
    TokenExpired,

    /// Access token was revoked by logout
    #[error("Token revoked")]
    TokenRevoked,

    /// Signature or claims did not verify
    #[error("Token invalid")]
    TokenInvalid,

    /// Token header names an algorithm other than HS512
    #[error("Invalid signing method")]
    InvalidSigningMethod,

    /// No session ever existed for the presented selector
    #[error("Session not found")]
    SessionNotFound,

    /// An already-rotated refresh token was presented again
    #[error("Refresh token reuse detected - all sessions revoked")]
    TheftDetected,

    /// Refresh attempted from a different user agent
    #[error("User agent changed - all sessions revoked")]
    UserAgentMismatch,

    /// Access token is not the one paired with the refresh session
    #[error("Access token does not belong to this refresh session")]
    TokenPairMismatch,

    /// Verifier half did not match the stored hash
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Signing key missing or JWT encoding failed
    #[error("Signing failure: {0}")]
    SigningFailure(String),

    /// Secure randomness unavailable
    #[error("Randomness failure: {0}")]
    RandomnessFailure(String),

    /// Session, user, revocation or keyed store unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Caller input rejected before any processing
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// API key rotation state is inconsistent
    #[error("Corrupt API key state: {0}")]
    CorruptKeyState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error codes for transport layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// See [`AuthError::MalformedToken`]
    MalformedToken,
    /// See [`AuthError::TokenExpired`]
    TokenExpired,
    /// See [`AuthError::TokenRevoked`]
    TokenRevoked,
    /// See [`AuthError::TokenInvalid`] and [`AuthError::InvalidSigningMethod`]
    TokenInvalid,
    /// See [`AuthError::SessionNotFound`]
    SessionNotFound,
    /// See [`AuthError::TheftDetected`]
    TheftDetected,
    /// See [`AuthError::UserAgentMismatch`]
    UserAgentMismatch,
    /// See [`AuthError::TokenPairMismatch`]
    TokenPairMismatch,
    /// See [`AuthError::InvalidRefreshToken`]
    InvalidRefreshToken,
    /// See [`AuthError::InvalidRequest`]
    InvalidRequest,
    /// See [`AuthError::StoreUnavailable`]
    StoreUnavailable,
    /// Everything the caller cannot act on
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedToken => "AUTH_TOKEN_MALFORMED",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::TokenRevoked => "AUTH_TOKEN_REVOKED",
            Self::TokenInvalid => "AUTH_TOKEN_INVALID",
            Self::SessionNotFound => "AUTH_SESSION_NOT_FOUND",
            Self::TheftDetected => "AUTH_THEFT_DETECTED",
            Self::UserAgentMismatch => "AUTH_USER_AGENT_CHANGED",
            Self::TokenPairMismatch => "AUTH_TOKEN_PAIR_MISMATCH",
            Self::InvalidRefreshToken => "AUTH_REFRESH_INVALID",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::StoreUnavailable => "SERVICE_UNAVAILABLE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller should be told "unauthenticated" rather than
    /// "bad request" or "server error".
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::TokenRevoked
                | Self::TokenInvalid
                | Self::SessionNotFound
                | Self::TheftDetected
                | Self::UserAgentMismatch
                | Self::TokenPairMismatch
                | Self::InvalidRefreshToken
        )
    }
}

impl AuthError {
    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MalformedToken(_) => ErrorCode::MalformedToken,
            Self::TokenExpired => ErrorCode::TokenExpired,
            Self::TokenRevoked => ErrorCode::TokenRevoked,
            Self::TokenInvalid | Self::InvalidSigningMethod => ErrorCode::TokenInvalid,
            Self::SessionNotFound => ErrorCode::SessionNotFound,
            Self::TheftDetected => ErrorCode::TheftDetected,
            Self::UserAgentMismatch => ErrorCode::UserAgentMismatch,
            Self::TokenPairMismatch => ErrorCode::TokenPairMismatch,
            Self::InvalidRefreshToken => ErrorCode::InvalidRefreshToken,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            Self::SigningFailure(_)
            | Self::RandomnessFailure(_)
            | Self::CorruptKeyState(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Whether this error was preceded by mass session revocation.
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(self, Self::TheftDetected | Self::UserAgentMismatch)
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store unavailable error.
    #[must_use]
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Create a malformed token error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedToken(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidSignature => Self::TokenInvalid,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::InvalidSigningMethod
            }
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::MalformedToken(format!("missing required claim: {claim}"))
            }
            ErrorKind::InvalidKeyFormat | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_) => {
                Self::SigningFailure(err.to_string())
            }
            _ => Self::MalformedToken(err.to_string()),
        }
    }
}

impl From<PlatformError> for AuthError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::InvalidInput(msg) => Self::InvalidRequest(msg),
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_retryable() {
        assert!(AuthError::store("down").is_retryable());
        assert!(!AuthError::TheftDetected.is_retryable());
        assert!(!AuthError::SigningFailure("x".into()).is_retryable());
        assert!(!AuthError::RandomnessFailure("x".into()).is_retryable());
    }

    #[test]
    fn test_security_events() {
        assert!(AuthError::TheftDetected.is_security_event());
        assert!(AuthError::UserAgentMismatch.is_security_event());
        assert!(!AuthError::TokenPairMismatch.is_security_event());
        assert!(!AuthError::InvalidRefreshToken.is_security_event());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::TheftDetected.code().as_str(), "AUTH_THEFT_DETECTED");
        assert_eq!(AuthError::InvalidSigningMethod.code(), ErrorCode::TokenInvalid);
        assert_eq!(AuthError::config("x").code(), ErrorCode::Internal);
        assert!(AuthError::TokenRevoked.code().is_unauthenticated());
        assert!(!AuthError::malformed("x").code().is_unauthenticated());
    }

    #[test]
    fn test_platform_error_conversion() {
        let err: AuthError = PlatformError::unavailable("connection refused").into();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));

        let err: AuthError = PlatformError::invalid_input("bad ttl").into();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }

    #[test]
    fn test_jwt_error_conversion() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let err: AuthError = Error::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(err, AuthError::TokenExpired));

        let err: AuthError = Error::from(ErrorKind::InvalidAlgorithm).into();
        assert!(matches!(err, AuthError::InvalidSigningMethod));

        let err: AuthError = Error::from(ErrorKind::InvalidToken).into();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }
}
