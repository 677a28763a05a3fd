//! Callback signature verification.
//!
//! The execution service signs the raw request body with HMAC-SHA256 using a
//! shared secret and sends the lowercase hex digest in `x-scf-signature`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC of the raw body.
pub const SIGNATURE_HEADER: &str = "x-scf-signature";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

/// Outcome of a verification that did not reject the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Signature present and correct.
    Verified,
    /// Enforcement is off and the signature was missing or wrong.
    Unverified,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    enforce: bool,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, enforce: bool) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            enforce,
        }
    }

    pub fn enforced(&self) -> bool {
        self.enforce
    }

    /// Verify `signature` against `body`.
    ///
    /// With enforcement off, failures are reported as [`Verification::Unverified`]
    /// instead of an error so the record can carry `validated = false`.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<Verification, SignatureError> {
        match self.check(body, signature) {
            Ok(()) => Ok(Verification::Verified),
            Err(e) if self.enforce => Err(e),
            Err(e) => {
                tracing::debug!(reason = %e, "Accepting unverified callback, enforcement disabled");
                Ok(Verification::Unverified)
            }
        }
    }

    fn check(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let provided = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::Missing)?;
        let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
        let expected = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::Mismatch)?;
        mac.update(body);
        // verify_slice compares in constant time.
        mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .field("enforce", &self.enforce)
            .finish()
    }
}

/// Hex HMAC-SHA256 of `body`, as the execution service computes it.
pub fn sign(secret: impl AsRef<[u8]>, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never takes the else branch.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_ref()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
