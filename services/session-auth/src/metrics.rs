//! Prometheus metrics for the session auth service.
//!
//! Registration only fails on duplicate metric names, which is a
//! programming error.
#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec};

/// Token pairs issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_auth_tokens_issued_total",
        "Total number of token pairs issued",
        &["flow"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Refresh attempts counter.
pub static REFRESHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_auth_refreshes_total",
        "Total number of refresh attempts",
        &["status"]
    )
    .expect("Failed to register refreshes metric")
});

/// Sessions revoked counter.
pub static SESSIONS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_auth_sessions_revoked_total",
        "Total number of sessions revoked",
        &["reason"]
    )
    .expect("Failed to register sessions_revoked metric")
});

/// Security events counter.
pub static SECURITY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_auth_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Rate limit decisions counter.
pub static RATE_LIMIT_DECISIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_auth_rate_limit_decisions_total",
        "Total number of rate limit decisions",
        &["decision"]
    )
    .expect("Failed to register rate_limit_decisions metric")
});

/// API key checks counter.
pub static API_KEY_CHECKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_auth_api_key_checks_total",
        "Total number of API key validations",
        &["result"]
    )
    .expect("Failed to register api_key_checks metric")
});

/// Record a token pair issuance (`login` or `refresh`).
pub fn record_tokens_issued(flow: &str) {
    TOKENS_ISSUED.with_label_values(&[flow]).inc();
}

/// Record a refresh outcome.
pub fn record_refresh(status: &str) {
    REFRESHES.with_label_values(&[status]).inc();
}

/// Record revoked sessions.
#[allow(clippy::cast_precision_loss)]
pub fn record_sessions_revoked(reason: &str, count: u64) {
    SESSIONS_REVOKED.with_label_values(&[reason]).inc_by(count as f64);
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}

/// Record a rate limit decision.
pub fn record_rate_limit(decision: &str) {
    RATE_LIMIT_DECISIONS.with_label_values(&[decision]).inc();
}

/// Record an API key check.
pub fn record_api_key_check(result: &str) {
    API_KEY_CHECKS.with_label_values(&[result]).inc();
}
