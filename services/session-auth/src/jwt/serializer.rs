use crate::error::AuthError;
use crate::jwt::claims::AccessClaims;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use zeroize::Zeroizing;

/// Only accepted signing algorithm.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS512;

/// HS512 encoder/decoder for access tokens.
///
/// Expiry is not checked here; callers compare `exp` against their own clock.
pub struct JwtSerializer {
    secret: Zeroizing<Vec<u8>>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSerializer {
    /// Create a serializer for the given HMAC secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            secret: Zeroizing::new(secret.to_vec()),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailure`] if the secret is empty or
    /// encoding fails.
    pub fn serialize(&self, claims: &AccessClaims) -> Result<String, AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::SigningFailure("signing secret is empty".into()));
        }
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| AuthError::SigningFailure(e.to_string()))
    }

    /// Verify the signature and decode claims.
    ///
    /// # Errors
    ///
    /// `InvalidSigningMethod` for any algorithm but HS512, `TokenInvalid` for a
    /// bad signature and `MalformedToken` for anything unparsable.
    pub fn deserialize(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let alg = header_algorithm(token)?;
        if alg != "HS512" {
            return Err(AuthError::InvalidSigningMethod);
        }

        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Decode claims without checking signature or expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the payload cannot be read.
    pub fn deserialize_unverified(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let payload = segment(token, 1)?;
        serde_json::from_slice(&payload).map_err(|e| AuthError::malformed(e.to_string()))
    }
}

fn segment(token: &str, index: usize) -> Result<Vec<u8>, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::malformed("Invalid token format"));
    }
    URL_SAFE_NO_PAD
        .decode(parts[index])
        .map_err(|e| AuthError::malformed(e.to_string()))
}

/// `alg` header value, read before any key material is involved so that
/// algorithms the JWT library does not model (`none`) are still reported
/// as a signing method problem.
fn header_algorithm(token: &str) -> Result<String, AuthError> {
    let header: serde_json::Value = serde_json::from_slice(&segment(token, 0)?)
        .map_err(|e| AuthError::malformed(e.to_string()))?;
    header
        .get("alg")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AuthError::malformed("missing alg header"))
}
