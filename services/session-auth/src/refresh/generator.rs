use crate::error::AuthError;
use crate::random::SecureRandom;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Random bytes in each refresh token half.
pub const PART_BYTES: usize = 16;

/// Freshly generated refresh token.
///
/// `token` is handed to the client exactly once; only `selector` and
/// `verifier_hash` are persisted.
pub struct RefreshMaterial {
    /// `selector.verifier`
    pub token: Zeroizing<String>,
    /// Public lookup half
    pub selector: String,
    /// Digest of the secret half
    pub verifier_hash: String,
}

impl std::fmt::Debug for RefreshMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshMaterial")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Refresh token split into its halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshParts<'a> {
    /// Public lookup half
    pub selector: &'a str,
    /// Secret half
    pub verifier: &'a str,
}

/// Generates and checks selector/verifier refresh tokens.
pub struct RefreshTokenGenerator;

impl RefreshTokenGenerator {
    /// Generate a new `selector.verifier` token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RandomnessFailure`] if the source fails.
    pub fn generate(random: &dyn SecureRandom) -> Result<RefreshMaterial, AuthError> {
        let mut selector_bytes = [0u8; PART_BYTES];
        let mut verifier_bytes = Zeroizing::new([0u8; PART_BYTES]);
        random.fill(&mut selector_bytes)?;
        random.fill(&mut verifier_bytes[..])?;

        let selector = URL_SAFE_NO_PAD.encode(selector_bytes);
        let verifier = Zeroizing::new(URL_SAFE_NO_PAD.encode(&verifier_bytes[..]));
        let verifier_hash = Self::hash(&verifier);

        Ok(RefreshMaterial {
            token: Zeroizing::new(format!("{selector}.{}", verifier.as_str())),
            selector,
            verifier_hash,
        })
    }

    /// SHA-256 of the verifier, base64url without padding.
    #[must_use]
    pub fn hash(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    /// Split a token into exactly two non-empty halves.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] for any other shape.
    pub fn split(token: &str) -> Result<RefreshParts<'_>, AuthError> {
        let mut parts = token.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(selector), Some(verifier), None) if !selector.is_empty() && !verifier.is_empty() => {
                Ok(RefreshParts { selector, verifier })
            }
            _ => Err(AuthError::malformed("refresh token must be selector.verifier")),
        }
    }

    /// Check a presented token against the stored verifier hash.
    ///
    /// # Errors
    ///
    /// `MalformedToken` for a bad shape, `InvalidRefreshToken` on mismatch.
    pub fn verify(token: &str, stored_hash: &str) -> Result<(), AuthError> {
        let parts = Self::split(token)?;
        let presented = Self::hash(parts.verifier);

        if bool::from(presented.as_bytes().ct_eq(stored_hash.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::InvalidRefreshToken)
        }
    }
}
