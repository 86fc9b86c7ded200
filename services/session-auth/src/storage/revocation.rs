//! Access token blacklist on top of a keyed store.

use super::RevocationStore;
use crate::error::AuthError;
use async_trait::async_trait;
use rust_common::{Guard, KeyWrite, KeyedStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Stores `revoked:<sha256(token)>` markers that expire with the token.
#[derive(Clone)]
pub struct KeyedRevocationStore {
    store: Arc<dyn KeyedStore>,
}

impl KeyedRevocationStore {
    /// Create a revocation store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    fn key(token: &str) -> String {
        format!("revoked:{}", hex::encode(Sha256::digest(token.as_bytes())))
    }
}

#[async_trait]
impl RevocationStore for KeyedRevocationStore {
    async fn revoke(&self, token: &str, ttl: Duration) -> Result<bool, AuthError> {
        let key = Self::key(token);
        let marker = [KeyWrite::expiring(key.clone(), "1", ttl)];
        Ok(self.store.guarded_write(&Guard::absent(key), &marker).await?)
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        Ok(self.store.exists(&Self::key(token)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_common::{Clock, KeyedStoreConfig, LocalKeyedStore, ManualClock};

    fn revocations() -> (KeyedRevocationStore, Arc<LocalKeyedStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(LocalKeyedStore::new(KeyedStoreConfig::default(), dyn_clock));
        (KeyedRevocationStore::new(store.clone()), store, clock)
    }

    #[tokio::test]
    async fn test_revoke_until_ttl() {
        let (revocations, _, clock) = revocations();

        assert!(!revocations.is_revoked("token-a").await.unwrap());
        assert!(revocations.revoke("token-a", Duration::from_secs(30)).await.unwrap());
        assert!(revocations.is_revoked("token-a").await.unwrap());
        assert!(!revocations.is_revoked("token-b").await.unwrap());

        clock.advance(Duration::from_secs(30));
        assert!(!revocations.is_revoked("token-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_raw_token_is_not_stored() {
        let (revocations, store, _) = revocations();
        revocations.revoke("secret.jwt.value", Duration::from_secs(30)).await.unwrap();

        assert!(!store.exists("revoked:secret.jwt.value").await.unwrap());
        assert!(store
            .exists(&KeyedRevocationStore::key("secret.jwt.value"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_second_revoke_is_refused() {
        let (revocations, _, clock) = revocations();

        assert!(revocations.revoke("token-a", Duration::from_secs(30)).await.unwrap());
        assert!(!revocations.revoke("token-a", Duration::from_secs(300)).await.unwrap());

        // The refused call did not extend the marker.
        clock.advance(Duration::from_secs(30));
        assert!(!revocations.is_revoked("token-a").await.unwrap());
        assert!(revocations.revoke("token-a", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_revokes_single_winner() {
        let (revocations, _, _) = revocations();
        let revocations = Arc::new(revocations);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let revocations = revocations.clone();
            handles.push(tokio::spawn(async move {
                revocations.revoke("token-a", Duration::from_secs(30)).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
    }
}
