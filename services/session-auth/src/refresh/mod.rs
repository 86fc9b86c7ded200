//! Selector/verifier refresh tokens and the sessions they unlock.

pub mod generator;
pub mod session;

pub use generator::{RefreshMaterial, RefreshParts, RefreshTokenGenerator};
pub use session::{NewSession, RefreshSession, SessionStatus, User};
