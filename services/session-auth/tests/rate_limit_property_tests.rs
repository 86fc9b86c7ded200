//! Property-based tests for request gating.
//!
//! Property 1: A client gets exactly `limit` requests per window
//! Property 2: A rotated API key stays valid through the grace period inclusive

use proptest::prelude::*;
use rust_common::{Clock, FixedWindow, KeyedStoreConfig, LocalKeyedStore, ManualClock};
use session_auth::apikey::{ApiKeyRotator, SyncOutcome, GRACE_PERIOD};
use session_auth::rate_limit::{RateLimitDecision, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

fn local_store(clock: Arc<ManualClock>) -> Arc<LocalKeyedStore> {
    let dyn_clock: Arc<dyn Clock> = clock;
    Arc::new(LocalKeyedStore::new(
        KeyedStoreConfig::default().with_namespace("gate-prop"),
        dyn_clock,
    ))
}

/// Generate arbitrary client keys.
fn arb_client() -> impl Strategy<Value = String> {
    "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}".prop_map(|s| s)
}

/// Generate arbitrary API keys.
fn arb_api_key() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{16,48}".prop_map(|s| s)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property 1: A client gets exactly `limit` requests per window
    #[test]
    fn prop_limit_per_window(
        client in arb_client(),
        limit in 1u64..30,
        window_secs in 1u64..600,
        block_secs in 0u64..600,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::starting_now());
            let policy = FixedWindow {
                limit,
                window: Duration::from_secs(window_secs),
                block: Duration::from_secs(block_secs),
            };
            let limiter = RateLimiter::new(local_store(clock.clone()), policy);

            for _ in 0..limit {
                prop_assert!(limiter.check(&client).await.is_allowed());
            }
            let limited = limiter.check(&client).await;
            let expected_retry = if block_secs == 0 { window_secs } else { block_secs };
            prop_assert_eq!(
                limited,
                RateLimitDecision::Limited { retry_after: Duration::from_secs(expected_retry) }
            );
            prop_assert_eq!(limiter.is_blocked(&client).await, block_secs > 0);

            clock.advance(Duration::from_secs(window_secs));
            prop_assert!(limiter.check(&client).await.is_allowed());
            Ok(())
        })?;
    }

    /// Property 2: A rotated API key stays valid through the grace period inclusive
    #[test]
    fn prop_api_key_grace_window(
        old in arb_api_key(),
        new in arb_api_key(),
        elapsed_secs in 0u64..(2 * 24 * 60 * 60),
    ) {
        prop_assume!(old != new);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::starting_now());
            let dyn_clock: Arc<dyn Clock> = clock.clone();
            let rotator = ApiKeyRotator::new(local_store(clock.clone()), dyn_clock);

            prop_assert_eq!(rotator.sync_key(&old).await.unwrap(), SyncOutcome::Initialized);
            prop_assert_eq!(rotator.sync_key(&new).await.unwrap(), SyncOutcome::Rotated);
            prop_assert_eq!(rotator.sync_key(&new).await.unwrap(), SyncOutcome::Unchanged);

            let elapsed = Duration::from_secs(elapsed_secs);
            clock.advance(elapsed);

            prop_assert!(rotator.is_valid(&new).await.unwrap());
            prop_assert_eq!(rotator.is_valid(&old).await.unwrap(), elapsed <= GRACE_PERIOD);
            Ok(())
        })?;
    }
}
