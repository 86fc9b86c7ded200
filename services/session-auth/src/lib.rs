//! Session auth service library.
//!
//! Issues short-lived signed access tokens paired with rotating refresh
//! tokens, detects refresh token reuse, revokes access tokens on logout,
//! rate limits clients and rotates the shared service API key.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod apikey;
pub mod config;
pub mod context;
pub mod error;
pub mod issuer;
pub mod jwt;
pub mod metrics;
pub mod notify;
pub mod random;
pub mod rate_limit;
pub mod refresh;
pub mod service;
pub mod storage;
pub mod theft;

// Re-exports for convenience
pub use config::Config;
pub use context::ServiceContext;
pub use error::{AuthError, ErrorCode};
pub use issuer::TokenIssuer;
pub use service::{AuthService, SessionMetadata, TokenPair};
