//! Shared keyed store contract.
//!
//! A keyed store is a TTL-aware string key/value store with two atomic
//! capabilities on top of plain `get`/`set`:
//!
//! - [`KeyedStore::hit_fixed_window`]: read, compare, conditionally set a
//!   block marker, increment and conditionally set a TTL, as one unit.
//! - [`KeyedStore::guarded_write`]: compare one key against an expected value
//!   and, only on match, apply a batch of writes, as one unit.
//!
//! Remote backends realise these with server-side scripts; [`LocalKeyedStore`]
//! realises them by holding a single write guard for the whole operation.

use crate::{Clock, PlatformError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Fixed-window rate policy evaluated atomically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    /// Maximum hits allowed inside one window
    pub limit: u64,
    /// Window length; the counter's TTL
    pub window: Duration,
    /// Block marker TTL once the limit is reached; zero disables the marker
    pub block: Duration,
}

impl FixedWindow {
    /// Key of the block marker paired with `counter_key`.
    #[must_use]
    pub fn block_key(counter_key: &str) -> String {
        format!("{counter_key}:block")
    }
}

/// Result of one fixed-window hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Hit counted; `count` is the counter value after the increment
    Allowed {
        /// Counter value after this hit
        count: u64,
    },
    /// Limit already reached; nothing was counted
    Limited,
}

/// Precondition for a [`KeyedStore::guarded_write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    /// Key to compare
    pub key: String,
    /// Required current value; `None` requires the key to be absent
    pub expected: Option<String>,
}

impl Guard {
    /// Require `key` to be absent.
    #[must_use]
    pub fn absent(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expected: None,
        }
    }

    /// Require `key` to hold exactly `value`.
    #[must_use]
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expected: Some(value.into()),
        }
    }
}

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWrite {
    /// Target key
    pub key: String,
    /// New value
    pub value: String,
    /// Expiry; `None` persists the key
    pub ttl: Option<Duration>,
}

impl KeyWrite {
    /// Write that never expires.
    #[must_use]
    pub fn persistent(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    /// Write that expires after `ttl`.
    #[must_use]
    pub fn expiring(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        }
    }
}

/// TTL-aware key/value store with atomic compound operations.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Read a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, PlatformError>;

    /// Write a value, replacing any previous one and its TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PlatformError>;

    /// Whether a live value exists.
    async fn exists(&self, key: &str) -> Result<bool, PlatformError>;

    /// Remove a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), PlatformError>;

    /// Count one hit against the fixed window stored at `key`.
    ///
    /// Must be indivisible: concurrent callers can never push the counter
    /// past `policy.limit`.
    async fn hit_fixed_window(
        &self,
        key: &str,
        policy: &FixedWindow,
    ) -> Result<WindowOutcome, PlatformError>;

    /// Apply `writes` only if `guard` holds, with no observable partial state.
    ///
    /// Returns `false` (and writes nothing) when the guard does not hold.
    async fn guarded_write(&self, guard: &Guard, writes: &[KeyWrite]) -> Result<bool, PlatformError>;
}

/// Local store configuration.
#[derive(Debug, Clone)]
pub struct KeyedStoreConfig {
    /// Namespace for key isolation
    pub namespace: String,
    /// Entry count above which expired entries are swept; not a capacity
    pub max_entries: usize,
}

impl Default for KeyedStoreConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            max_entries: 10_000,
        }
    }
}

impl KeyedStoreConfig {
    /// Create config with custom namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Create config with custom sweep threshold.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process keyed store.
///
/// Suitable for single-instance deployments and tests. Expiry is evaluated
/// against the injected [`Clock`], so TTLs follow a `ManualClock` exactly.
///
/// `max_entries` is a sweep threshold, not a capacity. Above it expired
/// entries are dropped on the next write. Live entries are never evicted,
/// so memory grows with the number of live keys (one counter per active
/// client within a window). Unbounded client sets belong on a shared store
/// with server-side expiry.
pub struct LocalKeyedStore {
    config: KeyedStoreConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl LocalKeyedStore {
    /// Create a new local store.
    #[must_use]
    pub fn new(config: KeyedStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Number of stored entries, live or not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn deadline(now: DateTime<Utc>, ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>, PlatformError> {
        ttl.map(|ttl| {
            ChronoDuration::from_std(ttl)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| PlatformError::invalid_input(format!("TTL out of range: {ttl:?}")))
        })
        .transpose()
    }

    fn live_value<'a>(
        entries: &'a HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a Entry> {
        entries.get(key).filter(|entry| entry.is_live(now))
    }

    fn sweep_if_full(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        if entries.len() > self.config.max_entries {
            entries.retain(|_, entry| entry.is_live(now));
            if entries.len() > self.config.max_entries {
                warn!(
                    namespace = %self.config.namespace,
                    live = entries.len(),
                    max_entries = self.config.max_entries,
                    "local keyed store above sweep threshold with only live entries"
                );
            }
        }
    }
}

#[async_trait]
impl KeyedStore for LocalKeyedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PlatformError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(Self::live_value(&entries, &self.namespaced_key(key), now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PlatformError> {
        let now = self.clock.now();
        let expires_at = Self::deadline(now, ttl)?;

        let mut entries = self.entries.write().await;
        entries.insert(
            self.namespaced_key(key),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.sweep_if_full(&mut entries, now);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, PlatformError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(Self::live_value(&entries, &self.namespaced_key(key), now).is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), PlatformError> {
        self.entries.write().await.remove(&self.namespaced_key(key));
        Ok(())
    }

    async fn hit_fixed_window(
        &self,
        key: &str,
        policy: &FixedWindow,
    ) -> Result<WindowOutcome, PlatformError> {
        let now = self.clock.now();
        let counter_key = self.namespaced_key(key);

        let mut entries = self.entries.write().await;

        let (current, expires_at) = match Self::live_value(&entries, &counter_key, now) {
            Some(entry) => {
                let count = entry
                    .value
                    .parse::<u64>()
                    .map_err(|e| PlatformError::corrupt(key, e.to_string()))?;
                (count, entry.expires_at)
            }
            None => (0, None),
        };

        if current >= policy.limit {
            if !policy.block.is_zero() {
                let block_key = self.namespaced_key(&FixedWindow::block_key(key));
                if Self::live_value(&entries, &block_key, now).is_none() {
                    let block_until = Self::deadline(now, Some(policy.block))?;
                    entries.insert(
                        block_key,
                        Entry {
                            value: "1".to_string(),
                            expires_at: block_until,
                        },
                    );
                }
            }
            return Ok(WindowOutcome::Limited);
        }

        // The window starts on the first hit and is never extended.
        let expires_at = if current == 0 {
            Self::deadline(now, Some(policy.window))?
        } else {
            expires_at
        };

        let count = current + 1;
        entries.insert(
            counter_key,
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        self.sweep_if_full(&mut entries, now);

        Ok(WindowOutcome::Allowed { count })
    }

    async fn guarded_write(&self, guard: &Guard, writes: &[KeyWrite]) -> Result<bool, PlatformError> {
        let now = self.clock.now();

        // Resolve every deadline before taking the lock so a bad TTL can't
        // leave the batch half-applied.
        let prepared = writes
            .iter()
            .map(|w| Ok((self.namespaced_key(&w.key), w.value.clone(), Self::deadline(now, w.ttl)?)))
            .collect::<Result<Vec<_>, PlatformError>>()?;

        let mut entries = self.entries.write().await;

        let actual = Self::live_value(&entries, &self.namespaced_key(&guard.key), now)
            .map(|e| e.value.as_str());
        if actual != guard.expected.as_deref() {
            return Ok(false);
        }

        for (key, value, expires_at) in prepared {
            entries.insert(key, Entry { value, expires_at });
        }
        self.sweep_if_full(&mut entries, now);

        Ok(true)
    }
}
