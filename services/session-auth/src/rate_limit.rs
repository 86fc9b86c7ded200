//! Distributed fixed-window rate limiter.
//!
//! Each hit is a single atomic operation on the shared keyed store, so the
//! limit holds across every instance sharing that store. When the store is
//! unreachable requests are allowed.

use crate::metrics;
use rust_common::{FixedWindow, KeyedStore, WindowOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rate limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request allowed
    Allowed,
    /// Request denied; retry after the given duration
    Limited {
        /// Value for the `Retry-After` header
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-client limiter over a [`KeyedStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyedStore>,
    policy: FixedWindow,
}

impl RateLimiter {
    /// Create a limiter enforcing `policy`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, policy: FixedWindow) -> Self {
        Self { store, policy }
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> &FixedWindow {
        &self.policy
    }

    fn counter_key(client_key: &str) -> String {
        format!("rate_limit:{client_key}")
    }

    /// Count one request from `client_key`.
    pub async fn check(&self, client_key: &str) -> RateLimitDecision {
        let key = Self::counter_key(client_key);

        match self.store.hit_fixed_window(&key, &self.policy).await {
            Ok(WindowOutcome::Allowed { count }) => {
                debug!(client = %client_key, count, "request allowed");
                metrics::record_rate_limit("allowed");
                RateLimitDecision::Allowed
            }
            Ok(WindowOutcome::Limited) => {
                let retry_after = if self.policy.block.is_zero() {
                    self.policy.window
                } else {
                    self.policy.block
                };
                debug!(client = %client_key, ?retry_after, "request limited");
                metrics::record_rate_limit("limited");
                RateLimitDecision::Limited { retry_after }
            }
            Err(e) => {
                warn!(client = %client_key, error = %e, "rate limit store unavailable, allowing request");
                metrics::record_rate_limit("fail_open");
                RateLimitDecision::Allowed
            }
        }
    }

    /// Whether `client_key` currently carries a block marker.
    ///
    /// Store failures report "not blocked".
    pub async fn is_blocked(&self, client_key: &str) -> bool {
        let key = FixedWindow::block_key(&Self::counter_key(client_key));
        match self.store.exists(&key).await {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(client = %client_key, error = %e, "rate limit store unavailable");
                false
            }
        }
    }
}
