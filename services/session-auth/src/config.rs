//! Centralized configuration for the session auth service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. A missing signing secret is fatal.

use crate::error::AuthError;
use rust_common::{FixedWindow, LogFormat, TracingConfig};
use std::env;
use std::time::Duration;

/// Session storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionBackend {
    /// Process-local maps behind a single lock
    #[default]
    Memory,
    /// PostgreSQL via sqlx
    Postgres,
}

impl std::str::FromStr for SessionBackend {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" => Ok(Self::Memory),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(AuthError::config(format!("Unknown session backend: {other}"))),
        }
    }
}

impl std::fmt::Display for SessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Service configuration.
#[derive(Clone)]
pub struct Config {
    // JWT settings
    /// HMAC secret for HS512 access tokens
    pub jwt_secret: String,
    /// Access token TTL
    pub access_token_ttl: Duration,
    /// Refresh session TTL
    pub refresh_token_ttl: Duration,

    // Rate limiting
    /// Requests per window
    pub rate_limit: u64,
    /// Window length
    pub rate_limit_interval: Duration,
    /// Block marker lifetime once the limit is hit
    pub rate_limit_block: Duration,

    // Integration
    /// Shared service API key to sync at startup
    pub api_key: Option<String>,
    /// IP-change webhook endpoint
    pub webhook_url: Option<String>,

    // Storage
    /// Session store backend
    pub session_backend: SessionBackend,
    /// PostgreSQL connection string
    pub database_url: Option<String>,
    /// Redis connection string for the keyed store
    pub redis_url: Option<String>,
    /// Expired-session janitor period
    pub purge_interval: Duration,

    // Logging
    /// Default filter directive
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("rate_limit", &self.rate_limit)
            .field("rate_limit_interval", &self.rate_limit_interval)
            .field("rate_limit_block", &self.rate_limit_block)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("webhook_url", &self.webhook_url)
            .field("session_backend", &self.session_backend)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("redis_url", &self.redis_url)
            .field("purge_interval", &self.purge_interval)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::config("JWT_SECRET must be set"))?;

        let access_token_ttl = Duration::from_secs(parse_var(&lookup, "ACCESS_TOKEN_TTL", 900)?);
        let refresh_token_ttl =
            Duration::from_secs(parse_var(&lookup, "REFRESH_TOKEN_TTL", 86_400)?);
        if access_token_ttl.is_zero() || refresh_token_ttl.is_zero() {
            return Err(AuthError::config("Token TTLs must be positive"));
        }

        let rate_limit = parse_var(&lookup, "RATE_LIMIT_LIMIT", 100)?;
        let rate_limit_interval =
            Duration::from_secs(parse_var(&lookup, "RATE_LIMIT_INTERVAL", 60)?);
        let rate_limit_block = Duration::from_secs(parse_var(&lookup, "RATE_LIMIT_BLOCK_TIME", 300)?);
        if rate_limit_interval.is_zero() {
            return Err(AuthError::config("RATE_LIMIT_INTERVAL must be positive"));
        }

        let session_backend = match lookup("SESSION_BACKEND") {
            Some(raw) => raw.parse()?,
            None => SessionBackend::default(),
        };
        let database_url = non_empty(lookup("DATABASE_URL"));
        if session_backend == SessionBackend::Postgres && database_url.is_none() {
            return Err(AuthError::config(
                "DATABASE_URL is required for the postgres session backend",
            ));
        }

        let purge_interval =
            Duration::from_secs(parse_var(&lookup, "SESSION_PURGE_INTERVAL", 300)?);
        if purge_interval.is_zero() {
            return Err(AuthError::config("SESSION_PURGE_INTERVAL must be positive"));
        }

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|e| AuthError::config(format!("{e}")))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            rate_limit,
            rate_limit_interval,
            rate_limit_block,
            api_key: non_empty(lookup("AUTH_SERVICE_API_KEY")),
            webhook_url: non_empty(lookup("WEBHOOK_URL")),
            session_backend,
            database_url,
            redis_url: non_empty(lookup("REDIS_URL")),
            purge_interval,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }

    /// Rate limiting policy.
    #[must_use]
    pub const fn rate_limit_policy(&self) -> FixedWindow {
        FixedWindow {
            limit: self.rate_limit,
            window: self.rate_limit_interval,
            block: self.rate_limit_block,
        }
    }

    /// Tracing subscriber settings.
    #[must_use]
    pub fn tracing(&self) -> TracingConfig {
        TracingConfig::default()
            .with_service_name("session-auth")
            .with_log_level(self.log_level.clone())
            .with_format(self.log_format)
    }
}

/// Parse a variable with default value.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AuthError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|e| AuthError::config(format!("Invalid {name}: {e}"))),
        None => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
