//! Shared service API key with current/old rotation.
//!
//! Only SHA-256 digests are stored. After a rotation the previous key keeps
//! working for a grace window measured from the recorded rotation time.

use crate::error::AuthError;
use crate::metrics;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_common::{Clock, Guard, KeyWrite, KeyedStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

const CURRENT_KEY: &str = "apikey:current";
const OLD_KEY: &str = "apikey:old";
const ROTATED_AT_KEY: &str = "apikey:rotation_time";

/// How long a superseded key stays valid.
pub const GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Store lifetime of the old key digest. Outlasts [`GRACE_PERIOD`] so the
/// recorded rotation time, not store expiry, decides the boundary.
const OLD_KEY_RETENTION: Duration = Duration::from_secs(GRACE_PERIOD.as_secs() + 60 * 60);

const MAX_SYNC_ATTEMPTS: usize = 3;

/// Result of [`ApiKeyRotator::sync_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No key was stored; this one is now current
    Initialized,
    /// This key is already current
    Unchanged,
    /// Previous current key moved to old
    Rotated,
}

/// Maintains and checks the shared API key.
pub struct ApiKeyRotator {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
}

fn digest(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn same_digest(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

impl ApiKeyRotator {
    /// Create a rotator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Make `raw` the current key.
    ///
    /// The read and the write are separated by a guard on the current digest,
    /// so two instances syncing different keys at once cannot interleave
    /// their writes; the loser re-reads and retries.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an empty key, `StoreUnavailable` on store failure
    /// or persistent contention.
    #[instrument(skip(self, raw))]
    pub async fn sync_key(&self, raw: &str) -> Result<SyncOutcome, AuthError> {
        if raw.is_empty() {
            return Err(AuthError::InvalidRequest("API key must not be empty".into()));
        }
        let incoming = digest(raw);

        for attempt in 1..=MAX_SYNC_ATTEMPTS {
            let now = self.clock.now().to_rfc3339_opts(SecondsFormat::Nanos, true);

            let (guard, writes, outcome) = match self.store.get(CURRENT_KEY).await? {
                Some(current) if same_digest(&current, &incoming) => return Ok(SyncOutcome::Unchanged),
                Some(current) => (
                    Guard::equals(CURRENT_KEY, current.clone()),
                    vec![
                        KeyWrite::expiring(OLD_KEY, current, OLD_KEY_RETENTION),
                        KeyWrite::persistent(CURRENT_KEY, incoming.clone()),
                        KeyWrite::persistent(ROTATED_AT_KEY, now),
                    ],
                    SyncOutcome::Rotated,
                ),
                None => (
                    Guard::absent(CURRENT_KEY),
                    vec![
                        KeyWrite::persistent(CURRENT_KEY, incoming.clone()),
                        KeyWrite::persistent(ROTATED_AT_KEY, now),
                    ],
                    SyncOutcome::Initialized,
                ),
            };

            if self.store.guarded_write(&guard, &writes).await? {
                info!(?outcome, "API key synced");
                return Ok(outcome);
            }
            warn!(attempt, "API key changed concurrently, retrying sync");
        }

        Err(AuthError::store("API key sync kept conflicting with concurrent updates"))
    }

    /// Whether `raw` is the current key, or the old key inside its grace
    /// window.
    ///
    /// # Errors
    ///
    /// `CorruptKeyState` when the old key matches but no readable rotation
    /// time exists; `StoreUnavailable` on store failure.
    pub async fn is_valid(&self, raw: &str) -> Result<bool, AuthError> {
        if raw.is_empty() {
            metrics::record_api_key_check("empty");
            return Ok(false);
        }
        let presented = digest(raw);

        if let Some(current) = self.store.get(CURRENT_KEY).await? {
            if same_digest(&current, &presented) {
                metrics::record_api_key_check("current");
                return Ok(true);
            }
        }

        let Some(old) = self.store.get(OLD_KEY).await? else {
            metrics::record_api_key_check("rejected");
            return Ok(false);
        };
        if !same_digest(&old, &presented) {
            metrics::record_api_key_check("rejected");
            return Ok(false);
        }

        let rotated_at = self.rotated_at().await?;
        let grace = chrono::Duration::from_std(GRACE_PERIOD)
            .map_err(|e| AuthError::internal(e.to_string()))?;
        let within_grace = self.clock.now() - rotated_at <= grace;

        metrics::record_api_key_check(if within_grace { "old" } else { "old_expired" });
        Ok(within_grace)
    }

    async fn rotated_at(&self) -> Result<DateTime<Utc>, AuthError> {
        let raw = self
            .store
            .get(ROTATED_AT_KEY)
            .await?
            .ok_or_else(|| AuthError::CorruptKeyState("rotation time missing".into()))?;

        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| AuthError::CorruptKeyState(format!("rotation time unreadable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_common::{KeyedStoreConfig, LocalKeyedStore, ManualClock};

    fn rotator() -> (ApiKeyRotator, Arc<LocalKeyedStore>, Arc<ManualClock>) {
        rotator_at(ManualClock::starting_now())
    }

    fn rotator_at(clock: ManualClock) -> (ApiKeyRotator, Arc<LocalKeyedStore>, Arc<ManualClock>) {
        let clock = Arc::new(clock);
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(LocalKeyedStore::new(KeyedStoreConfig::default(), dyn_clock.clone()));
        (ApiKeyRotator::new(store.clone(), dyn_clock), store, clock)
    }

    #[tokio::test]
    async fn test_initialize_then_unchanged() {
        let (rotator, store, _) = rotator();

        assert_eq!(rotator.sync_key("k1").await.unwrap(), SyncOutcome::Initialized);
        let rotated_at = store.get(ROTATED_AT_KEY).await.unwrap();

        assert_eq!(rotator.sync_key("k1").await.unwrap(), SyncOutcome::Unchanged);
        assert_eq!(store.get(ROTATED_AT_KEY).await.unwrap(), rotated_at);
        assert_eq!(store.get(OLD_KEY).await.unwrap(), None);
        assert!(rotator.is_valid("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stores_only_digests() {
        let (rotator, store, _) = rotator();
        rotator.sync_key("plain-secret").await.unwrap();

        let current = store.get(CURRENT_KEY).await.unwrap().unwrap();
        assert_eq!(current, digest("plain-secret"));
        assert_eq!(current.len(), 64);
    }

    #[tokio::test]
    async fn test_rotation_grace_window() {
        let (rotator, _, clock) = rotator();
        rotator.sync_key("k1").await.unwrap();
        assert_eq!(rotator.sync_key("k2").await.unwrap(), SyncOutcome::Rotated);

        assert!(rotator.is_valid("k1").await.unwrap());
        assert!(rotator.is_valid("k2").await.unwrap());

        clock.advance(GRACE_PERIOD - Duration::from_secs(1));
        assert!(rotator.is_valid("k1").await.unwrap());

        clock.advance(Duration::from_secs(2));
        assert!(!rotator.is_valid("k1").await.unwrap());
        assert!(rotator.is_valid("k2").await.unwrap());
    }

    #[tokio::test]
    async fn test_old_key_valid_at_exact_grace_boundary() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let (rotator, _, clock) = rotator_at(ManualClock::new(start));
        rotator.sync_key("k1").await.unwrap();
        rotator.sync_key("k2").await.unwrap();

        clock.advance(GRACE_PERIOD);
        assert!(rotator.is_valid("k1").await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(!rotator.is_valid("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotation_time_keeps_subsecond_precision() {
        let start = Utc.timestamp_opt(1_700_000_000, 750_000_000).unwrap();
        let (rotator, _, clock) = rotator_at(ManualClock::new(start));
        rotator.sync_key("k1").await.unwrap();
        rotator.sync_key("k2").await.unwrap();
        assert_eq!(rotator.rotated_at().await.unwrap(), start);

        clock.advance(GRACE_PERIOD);
        assert!(rotator.is_valid("k1").await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(!rotator.is_valid("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_and_empty_keys() {
        let (rotator, _, _) = rotator();
        assert!(!rotator.is_valid("anything").await.unwrap());

        rotator.sync_key("k1").await.unwrap();
        assert!(!rotator.is_valid("").await.unwrap());
        assert!(!rotator.is_valid("k2").await.unwrap());
        assert!(matches!(
            rotator.sync_key("").await,
            Err(AuthError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_rotation_time() {
        let (rotator, store, _) = rotator();
        rotator.sync_key("k1").await.unwrap();
        rotator.sync_key("k2").await.unwrap();

        store.set(ROTATED_AT_KEY, "yesterday", None).await.unwrap();
        assert!(matches!(
            rotator.is_valid("k1").await,
            Err(AuthError::CorruptKeyState(_))
        ));

        store.delete(ROTATED_AT_KEY).await.unwrap();
        assert!(matches!(
            rotator.is_valid("k1").await,
            Err(AuthError::CorruptKeyState(_))
        ));

        // The current key never needs the rotation time.
        assert!(rotator.is_valid("k2").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_syncs_settle_on_one_current() {
        let (rotator, store, _) = rotator();
        let rotator = Arc::new(rotator);
        rotator.sync_key("base").await.unwrap();

        let mut handles = Vec::new();
        for key in ["a", "b", "c", "d"] {
            let rotator = rotator.clone();
            handles.push(tokio::spawn(async move { rotator.sync_key(key).await }));
        }
        let mut synced = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => synced += 1,
                Err(e) => assert!(e.is_retryable(), "unexpected error: {e}"),
            }
        }
        assert!(synced >= 1);

        let current = store.get(CURRENT_KEY).await.unwrap().unwrap();
        let old = store.get(OLD_KEY).await.unwrap().unwrap();
        assert_ne!(current, old);
        assert!(["a", "b", "c", "d"].iter().any(|k| digest(k) == current));
    }
}
