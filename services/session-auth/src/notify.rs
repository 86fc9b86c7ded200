//! Outbound security notifications.
//!
//! Delivery is fire-and-forget: [`spawn_ip_change`] detaches a task and the
//! request path never waits on it. Failures are only logged.

use crate::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// A refresh arrived from a new IP with the same user agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpChangeEvent {
    /// Affected user
    pub user_id: i64,
    /// IP recorded on the session
    pub old_ip: String,
    /// IP of the refresh request
    pub new_ip: String,
    /// User agent shared by both
    pub user_agent: String,
}

/// Receiver of security notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one IP change event.
    async fn notify_ip_change(&self, event: &IpChangeEvent) -> Result<(), AuthError>;
}

/// Deliver `event` on a detached task.
///
/// The handle is returned for tests; production callers drop it.
pub fn spawn_ip_change(notifier: Arc<dyn Notifier>, event: IpChangeEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify_ip_change(&event).await {
            warn!(user_id = event.user_id, error = %e, "IP change notification failed");
        }
    })
}

/// POSTs events as JSON to a webhook.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a notifier for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::config(format!("webhook client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, event), fields(user_id = event.user_id))]
    async fn notify_ip_change(&self, event: &IpChangeEvent) -> Result<(), AuthError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| AuthError::internal(format!("webhook delivery failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::internal(format!(
                "webhook returned HTTP {}",
                response.status()
            )));
        }

        debug!("IP change notification delivered");
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_ip_change(&self, event: &IpChangeEvent) -> Result<(), AuthError> {
        debug!(user_id = event.user_id, "no webhook configured; IP change dropped");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Collects delivered events.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub events: Mutex<Vec<IpChangeEvent>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_ip_change(&self, event: &IpChangeEvent) -> Result<(), AuthError> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }
}
