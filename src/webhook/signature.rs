//! `X-Hub-Signature-256` verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,

    #[error("signature must use sha256=<hex> format")]
    Format,

    #[error("signature digest is not valid hex")]
    Hex,

    #[error("signature verification failed")]
    Mismatch,
}

/// Check `header` against HMAC-SHA256 of the raw body under `secret`
///
/// The digest comparison is constant time.
pub fn verify(payload: &[u8], header: Option<&str>, secret: &str) -> Result<(), SignatureError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::Missing)?;
    let digest_hex = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Format)?;
    let expected = hex::decode(digest_hex).map_err(|_| SignatureError::Hex)?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Header value a sender would attach for `payload`
pub fn sign(payload: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
