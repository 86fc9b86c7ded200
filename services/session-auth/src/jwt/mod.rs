//! Access token claims and HS512 serialization.

pub mod claims;
pub mod serializer;

pub use claims::AccessClaims;
pub use serializer::{JwtSerializer, SIGNING_ALGORITHM};
