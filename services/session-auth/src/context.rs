//! Runtime wiring: builds every component from [`Config`].

use crate::apikey::ApiKeyRotator;
use crate::config::{Config, SessionBackend};
use crate::error::AuthError;
use crate::issuer::TokenIssuer;
use crate::notify::{NoopNotifier, Notifier, WebhookNotifier};
use crate::random::{OsRandom, SecureRandom};
use crate::rate_limit::RateLimiter;
use crate::service::AuthService;
use crate::storage::{
    InMemorySessionStore, KeyedRevocationStore, PgSessionStore, RedisKeyedStore, SessionStore,
};
use rust_common::{Clock, KeyedStore, KeyedStoreConfig, LocalKeyedStore, SystemClock};
use std::sync::Arc;
use tracing::info;

const KEY_NAMESPACE: &str = "session-auth";
const PG_MAX_CONNECTIONS: u32 = 10;

/// Fully wired service components.
pub struct ServiceContext {
    /// Token issuance, refresh and logout
    pub auth: Arc<AuthService>,
    /// Per-client request limiter
    pub rate_limiter: RateLimiter,
    /// Shared API key
    pub api_keys: ApiKeyRotator,
}

impl ServiceContext {
    /// Build components for `config` with the system clock and OS randomness.
    ///
    /// # Errors
    ///
    /// Backend connection failures and invalid configuration.
    pub async fn build(config: &Config) -> Result<Self, AuthError> {
        let sessions: Arc<dyn SessionStore> = match config.session_backend {
            SessionBackend::Memory => Arc::new(InMemorySessionStore::new()),
            SessionBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| AuthError::config("DATABASE_URL is not set"))?;
                Arc::new(PgSessionStore::connect(url, PG_MAX_CONNECTIONS).await?)
            }
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let keyed: Arc<dyn KeyedStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisKeyedStore::connect(url, KEY_NAMESPACE).await?),
            None => Arc::new(LocalKeyedStore::new(
                KeyedStoreConfig::default().with_namespace(KEY_NAMESPACE),
                clock.clone(),
            )),
        };
        let notifier: Arc<dyn Notifier> = match config.webhook_url.as_deref() {
            Some(url) => Arc::new(WebhookNotifier::new(url, WebhookNotifier::DEFAULT_TIMEOUT)?),
            None => Arc::new(NoopNotifier),
        };

        info!(
            session_backend = %config.session_backend,
            shared_store = config.redis_url.is_some(),
            webhook = config.webhook_url.is_some(),
            "service context configured"
        );

        Self::assemble(config, sessions, keyed, notifier, clock, Arc::new(OsRandom))
    }

    /// Assemble components over already constructed backends.
    ///
    /// # Errors
    ///
    /// Invalid secrets or TTLs.
    pub fn assemble(
        config: &Config,
        sessions: Arc<dyn SessionStore>,
        keyed: Arc<dyn KeyedStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn SecureRandom>,
    ) -> Result<Self, AuthError> {
        let issuer = TokenIssuer::new(
            config.jwt_secret.as_bytes(),
            config.access_token_ttl,
            clock.clone(),
            random,
            Arc::new(KeyedRevocationStore::new(keyed.clone())),
        )?;
        let auth = AuthService::new(
            Arc::new(issuer),
            sessions,
            notifier,
            config.refresh_token_ttl,
        )?;

        Ok(Self {
            auth: Arc::new(auth),
            rate_limiter: RateLimiter::new(keyed.clone(), config.rate_limit_policy()),
            api_keys: ApiKeyRotator::new(keyed, clock),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::SessionMetadata;

    fn config() -> Config {
        Config::from_lookup(|name| match name {
            "JWT_SECRET" => Some("context-secret".into()),
            "RATE_LIMIT_LIMIT" => Some("2".into()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_in_memory_context() {
        let ctx = ServiceContext::build(&config()).await.unwrap();

        let pair = ctx
            .auth
            .issue_tokens("guid", &SessionMetadata::new("ua", "10.0.0.1"))
            .await
            .unwrap();
        assert!(ctx.auth.authenticate(&pair.access_token).await.is_ok());

        assert!(ctx.rate_limiter.check("10.0.0.1").await.is_allowed());
        assert!(ctx.rate_limiter.check("10.0.0.1").await.is_allowed());
        assert!(!ctx.rate_limiter.check("10.0.0.1").await.is_allowed());

        ctx.api_keys.sync_key("service-key").await.unwrap();
        assert!(ctx.api_keys.is_valid("service-key").await.unwrap());
    }
}
