// Webhook signature verification: hex HMAC-SHA512 over the raw body

use hmac::{Hmac, Mac};
use sha2::Sha512;
use thiserror::Error;
use tracing::debug;

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
    #[error("webhook secret not configured")]
    NoSecret,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn mac(&self) -> Result<HmacSha512, SignatureError> {
        if self.secret.is_empty() {
            return Err(SignatureError::NoSecret);
        }
        HmacSha512::new_from_slice(self.secret.as_bytes()).map_err(|_| SignatureError::NoSecret)
    }

    /// Hex signature of `payload`, as the gateway would send it
    pub fn sign(&self, payload: &[u8]) -> Result<String, SignatureError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify `signature` against the exact bytes received. Comparison is
    /// constant-time.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty()).ok_or(SignatureError::Missing)?;
        let provided = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload);
        mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)?;

        debug!(payload_len = payload.len(), "Webhook signature verified");
        Ok(())
    }
}
