//! Access token signing/validation and refresh token material.

use crate::error::AuthError;
use crate::jwt::{AccessClaims, JwtSerializer};
use crate::random::{uuid_v4, SecureRandom};
use crate::refresh::{RefreshMaterial, RefreshTokenGenerator};
use crate::storage::RevocationStore;
use chrono::{DateTime, Utc};
use rust_common::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Clock skew tolerated when checking `exp`.
pub const EXPIRY_LEEWAY_SECS: i64 = 5;

/// Freshly signed access token.
#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    /// Compact JWT
    pub token: String,
    /// Its jti claim
    pub jti: String,
    /// Its exp claim
    pub expires_at: DateTime<Utc>,
}

/// Identity carried by a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessIdentity {
    /// Authenticated user
    pub user_id: i64,
    /// Token id
    pub jti: String,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
}

/// Issues and checks credentials.
pub struct TokenIssuer {
    serializer: JwtSerializer,
    access_ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    random: Arc<dyn SecureRandom>,
    revocations: Arc<dyn RevocationStore>,
}

impl TokenIssuer {
    /// Create an issuer signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `access_ttl` is out of range.
    pub fn new(
        secret: &[u8],
        access_ttl: Duration,
        clock: Arc<dyn Clock>,
        random: Arc<dyn SecureRandom>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Result<Self, AuthError> {
        let access_ttl = chrono::Duration::from_std(access_ttl)
            .map_err(|e| AuthError::config(format!("access token TTL out of range: {e}")))?;

        Ok(Self {
            serializer: JwtSerializer::new(secret),
            access_ttl,
            clock,
            random,
            revocations,
        })
    }

    /// Current time on the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// New random jti.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RandomnessFailure`] if the source fails.
    pub fn new_jti(&self) -> Result<String, AuthError> {
        uuid_v4(self.random.as_ref())
    }

    /// Sign an access token for `user_id` with a fresh jti.
    ///
    /// # Errors
    ///
    /// Randomness or signing failures.
    pub fn create_access_token(&self, user_id: i64) -> Result<SignedAccessToken, AuthError> {
        let jti = self.new_jti()?;
        self.create_access_token_with_jti(user_id, &jti)
    }

    /// Sign an access token for `user_id` with the given jti.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailure`] if signing fails.
    pub fn create_access_token_with_jti(
        &self,
        user_id: i64,
        jti: &str,
    ) -> Result<SignedAccessToken, AuthError> {
        let now = self.clock.now();
        let claims = AccessClaims::new(user_id, jti, now, self.access_ttl);
        let token = self.serializer.serialize(&claims)?;

        Ok(SignedAccessToken {
            token,
            jti: claims.jti,
            expires_at: now + self.access_ttl,
        })
    }

    /// Generate a new refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RandomnessFailure`] if the source fails.
    pub fn create_refresh_token(&self) -> Result<RefreshMaterial, AuthError> {
        RefreshTokenGenerator::generate(self.random.as_ref())
    }

    /// Check a presented refresh token against the stored verifier hash.
    ///
    /// # Errors
    ///
    /// `MalformedToken` for a bad shape, `InvalidRefreshToken` on mismatch.
    pub fn validate_refresh_token(&self, token: &str, stored_hash: &str) -> Result<(), AuthError> {
        RefreshTokenGenerator::verify(token, stored_hash)
    }

    /// Validate an access token.
    ///
    /// The blacklist is consulted before anything else, so a logged-out
    /// token reports `TokenRevoked` even if it is also expired or forged.
    ///
    /// # Errors
    ///
    /// `TokenRevoked`, `InvalidSigningMethod`, `TokenInvalid`,
    /// `TokenExpired`, `MalformedToken` or `StoreUnavailable`.
    pub async fn validate_access_token(&self, token: &str) -> Result<AccessIdentity, AuthError> {
        if self.revocations.is_revoked(token).await? {
            debug!("access token is blacklisted");
            return Err(AuthError::TokenRevoked);
        }

        let claims = self.serializer.deserialize(token)?;
        if claims.is_expired_at(self.clock.now().timestamp(), EXPIRY_LEEWAY_SECS) {
            return Err(AuthError::TokenExpired);
        }

        let user_id = claims
            .user_id()
            .ok_or_else(|| AuthError::malformed("user id claim is not numeric"))?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| AuthError::malformed("exp out of range"))?;

        Ok(AccessIdentity {
            user_id,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Read claims without verifying signature or expiry.
    ///
    /// Not an authentication check.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the payload cannot be read.
    pub fn extract_unverified_claims(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.serializer.deserialize_unverified(token)
    }

    /// Revoke an access token until validation would reject it as expired,
    /// i.e. through `expires_at` plus the expiry leeway.
    ///
    /// The marker lives at least one second. Returns `false` if the token
    /// was already revoked.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn revoke_access_token(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let rejected_from = expires_at + chrono::Duration::seconds(EXPIRY_LEEWAY_SECS + 1);
        let residual = (rejected_from - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));
        self.revocations.revoke(token, residual).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::testing::FlakyRandom;
    use crate::random::OsRandom;
    use crate::storage::KeyedRevocationStore;
    use rust_common::{KeyedStoreConfig, LocalKeyedStore, ManualClock};

    struct Fixture {
        issuer: TokenIssuer,
        clock: Arc<ManualClock>,
        revocations: Arc<KeyedRevocationStore>,
    }

    fn fixture_with(secret: &[u8], random: Arc<dyn SecureRandom>) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let keyed = Arc::new(LocalKeyedStore::new(KeyedStoreConfig::default(), dyn_clock.clone()));
        let revocations = Arc::new(KeyedRevocationStore::new(keyed));
        let issuer = TokenIssuer::new(
            secret,
            Duration::from_secs(900),
            dyn_clock,
            random,
            revocations.clone(),
        )
        .unwrap();
        Fixture {
            issuer,
            clock,
            revocations,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(b"unit-test-secret", Arc::new(OsRandom))
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let f = fixture();
        let signed = f.issuer.create_access_token(42).unwrap();
        let identity = f.issuer.validate_access_token(&signed.token).await.unwrap();

        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.jti, signed.jti);
        assert_eq!(identity.expires_at.timestamp(), signed.expires_at.timestamp());
    }

    #[tokio::test]
    async fn test_caller_supplied_jti() {
        let f = fixture();
        let signed = f.issuer.create_access_token_with_jti(7, "fixed-jti").unwrap();
        let claims = f.issuer.extract_unverified_claims(&signed.token).unwrap();

        assert_eq!(claims.jti, "fixed-jti");
        assert_eq!(claims.uid, "7");
        assert_eq!(claims.sub, "7");
    }

    #[tokio::test]
    async fn test_expiry_uses_clock_and_leeway() {
        let f = fixture();
        let signed = f.issuer.create_access_token(1).unwrap();

        f.clock.advance(Duration::from_secs(900 + 5));
        assert!(f.issuer.validate_access_token(&signed.token).await.is_ok());

        f.clock.advance(Duration::from_secs(1));
        assert!(matches!(
            f.issuer.validate_access_token(&signed.token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_revocation_checked_before_anything_else() {
        let f = fixture();
        let signed = f.issuer.create_access_token(1).unwrap();
        f.revocations
            .revoke(&signed.token, Duration::from_secs(3600))
            .await
            .unwrap();

        // Even once expired the token reports revoked.
        f.clock.advance(Duration::from_secs(2000));
        assert!(matches!(
            f.issuer.validate_access_token(&signed.token).await,
            Err(AuthError::TokenRevoked)
        ));

        f.revocations.revoke("garbage", Duration::from_secs(60)).await.unwrap();
        assert!(matches!(
            f.issuer.validate_access_token("garbage").await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_foreign_signature_is_invalid() {
        let other = fixture_with(b"some-other-secret", Arc::new(OsRandom));
        let f = fixture();
        let signed = other.issuer.create_access_token(1).unwrap();

        assert!(matches!(
            f.issuer.validate_access_token(&signed.token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_revocation_outlives_expiry_leeway() {
        let f = fixture();
        let signed = f.issuer.create_access_token(1).unwrap();
        let identity = f.issuer.validate_access_token(&signed.token).await.unwrap();
        assert!(f
            .issuer
            .revoke_access_token(&signed.token, identity.expires_at)
            .await
            .unwrap());

        // Every second validation would still accept by expiry alone.
        for _ in 0..(900 + EXPIRY_LEEWAY_SECS) {
            f.clock.advance(Duration::from_secs(1));
            assert!(matches!(
                f.issuer.validate_access_token(&signed.token).await,
                Err(AuthError::TokenRevoked)
            ));
        }

        f.clock.advance(Duration::from_secs(2));
        assert!(matches!(
            f.issuer.validate_access_token(&signed.token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_revoke_past_expiry_lives_one_second() {
        let f = fixture();
        let past = f.issuer.now() - chrono::Duration::minutes(1);
        assert!(f.issuer.revoke_access_token("tok", past).await.unwrap());
        assert!(!f.issuer.revoke_access_token("tok", past).await.unwrap());

        assert!(f.revocations.is_revoked("tok").await.unwrap());
        f.clock.advance(Duration::from_secs(1));
        assert!(!f.revocations.is_revoked("tok").await.unwrap());
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let f = fixture();
        let material = f.issuer.create_refresh_token().unwrap();

        assert!(f
            .issuer
            .validate_refresh_token(&material.token, &material.verifier_hash)
            .is_ok());
        assert!(matches!(
            f.issuer.validate_refresh_token("no-dot", &material.verifier_hash),
            Err(AuthError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_failures_are_fatal() {
        let f = fixture_with(b"secret", Arc::new(FlakyRandom::broken()));
        assert!(matches!(f.issuer.new_jti(), Err(AuthError::RandomnessFailure(_))));
        assert!(matches!(
            f.issuer.create_refresh_token(),
            Err(AuthError::RandomnessFailure(_))
        ));

        let f = fixture_with(b"", Arc::new(OsRandom));
        assert!(matches!(
            f.issuer.create_access_token(1),
            Err(AuthError::SigningFailure(_))
        ));
    }
}
