//! HMAC-SHA256 signatures shared by outbound provider calls and inbound
//! webhook verification. Signatures travel as lowercase hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("webhook secret is not configured")]
    SecretNotConfigured,
    #[error("signature is not valid hex")]
    InvalidFormat,
    #[error("signature does not match payload")]
    Mismatch,
}

pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `signature_hex` against HMAC-SHA256(`payload`, `secret`) using the
/// constant-time comparison in `Mac::verify_slice`.
pub fn verify_hex(secret: &str, payload: &[u8], signature_hex: &str) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::SecretNotConfigured);
    }
    let signature_hex = signature_hex.trim();
    if signature_hex.is_empty() {
        return Err(SignatureError::Missing);
    }

    let received = hex::decode(signature_hex).map_err(|_| SignatureError::InvalidFormat)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::SecretNotConfigured)?;
    mac.update(payload);
    mac.verify_slice(&received)
        .map_err(|_| SignatureError::Mismatch)
}
