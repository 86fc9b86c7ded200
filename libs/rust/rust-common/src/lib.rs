//! Shared library for cross-cutting concerns in auth-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Error types with retryability classification
//! - The keyed store contract (TTL key/value with atomic compound operations)
//!   and its in-process implementation
//! - An injectable clock
//! - Tracing subscriber setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod keyed_store;
pub mod tracing_config;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::PlatformError;
pub use keyed_store::{
    FixedWindow, Guard, KeyWrite, KeyedStore, KeyedStoreConfig, LocalKeyedStore, WindowOutcome,
};
pub use tracing_config::{init_tracing, LogFormat, TracingConfig};
