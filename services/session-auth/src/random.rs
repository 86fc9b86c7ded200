//! Injectable source of cryptographic randomness.

use crate::error::AuthError;
use rand::rngs::OsRng;
use rand::RngCore;

/// Fills buffers with cryptographically secure random bytes.
pub trait SecureRandom: Send + Sync {
    /// Fill `dest` completely.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RandomnessFailure`] if the source is unavailable.
    fn fill(&self, dest: &mut [u8]) -> Result<(), AuthError>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), AuthError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| AuthError::RandomnessFailure(e.to_string()))
    }
}

/// Produce a fresh UUIDv4 string from the given source.
///
/// # Errors
///
/// Propagates randomness failures.
pub fn uuid_v4(random: &dyn SecureRandom) -> Result<String, AuthError> {
    let mut bytes = [0u8; 16];
    random.fill(&mut bytes)?;
    Ok(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
}
