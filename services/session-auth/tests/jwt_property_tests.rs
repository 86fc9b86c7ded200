//! Property-based tests for access token signing.
//!
//! Property 1: Claims survive a sign/verify cycle
//! Property 2: Tampered or foreign-key tokens are rejected
//! Property 3: Expiry honours the leeway

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use session_auth::jwt::{AccessClaims, JwtSerializer};
use session_auth::AuthError;

/// Generate arbitrary user IDs.
fn arb_user_id() -> impl Strategy<Value = i64> {
    1i64..i64::from(u32::MAX)
}

/// Generate arbitrary token IDs.
fn arb_jti() -> impl Strategy<Value = String> {
    "[a-f0-9]{8}-[a-f0-9]{4}-4[a-f0-9]{3}-[89ab][a-f0-9]{3}-[a-f0-9]{12}".prop_map(|s| s)
}

/// Generate arbitrary TTL (1 minute to 24 hours).
fn arb_ttl() -> impl Strategy<Value = i64> {
    60i64..86400i64
}

fn claims(user_id: i64, jti: &str, ttl: i64) -> AccessClaims {
    let issued = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    AccessClaims::new(user_id, jti, issued, Duration::seconds(ttl))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: Claims survive a sign/verify cycle
    #[test]
    fn prop_claims_survive_signing(
        user_id in arb_user_id(),
        jti in arb_jti(),
        ttl in arb_ttl(),
    ) {
        let serializer = JwtSerializer::new(b"jwt-property-secret");
        let original = claims(user_id, &jti, ttl);

        let token = serializer.serialize(&original).unwrap();
        prop_assert_eq!(token.split('.').count(), 3);

        let verified = serializer.deserialize(&token).unwrap();
        prop_assert_eq!(&verified, &original);
        prop_assert_eq!(verified.user_id(), Some(user_id));
        prop_assert_eq!(verified.exp - verified.iat, ttl);

        let unverified = serializer.deserialize_unverified(&token).unwrap();
        prop_assert_eq!(unverified.jti, jti);
    }

    /// Property 2: Tampered or foreign-key tokens are rejected
    #[test]
    fn prop_tampering_is_rejected(
        user_id in arb_user_id(),
        jti in arb_jti(),
        other_user in arb_user_id(),
    ) {
        prop_assume!(user_id != other_user);
        let serializer = JwtSerializer::new(b"jwt-property-secret");
        let foreign = JwtSerializer::new(b"some-other-secret");

        let token = serializer.serialize(&claims(user_id, &jti, 900)).unwrap();
        let forged = foreign.serialize(&claims(other_user, &jti, 900)).unwrap();

        // Original header and signature around a foreign payload.
        let parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

        prop_assert!(matches!(serializer.deserialize(&forged), Err(AuthError::TokenInvalid)));
        prop_assert!(matches!(serializer.deserialize(&spliced), Err(AuthError::TokenInvalid)));
    }

    /// Property 3: Expiry honours the leeway
    #[test]
    fn prop_expiry_leeway(ttl in arb_ttl(), offset in -10i64..10) {
        let claims = claims(7, "jti", ttl);
        let now = claims.exp + offset;

        prop_assert_eq!(claims.is_expired_at(now, 5), offset > 5);
        prop_assert_eq!(claims.is_expired_at(now, 0), offset > 0);
    }
}

#[test]
fn test_garbage_is_malformed() {
    let serializer = JwtSerializer::new(b"jwt-property-secret");

    for input in ["", "abc", "a.b", "not.a.jwt"] {
        assert!(
            matches!(
                serializer.deserialize_unverified(input),
                Err(AuthError::MalformedToken(_))
            ),
            "{input:?} should be malformed"
        );
    }
}
