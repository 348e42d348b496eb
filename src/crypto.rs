//! Request signing for the TransIP API
//!
//! Every SOAP call carries a signature over its parameters: RSA PKCS#1 v1.5
//! with SHA-512, base64 encoded. Keys are the PEM private keys handed out
//! by the TransIP control panel (PKCS#1 or PKCS#8).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha512};
use std::path::Path;
use tracing::info;

// =============================================================================
// KEY MANAGEMENT
// =============================================================================

/// Parse a PEM private key, PKCS#1 (`BEGIN RSA PRIVATE KEY`) or PKCS#8
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Load a private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, CryptoError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| CryptoError::Unreadable(format!("{}: {}", path.display(), e)))?;
    let key = parse_private_key(&pem)?;
    info!("🔑 Loaded signing key from {:?}", path);
    Ok(key)
}

/// Resolve a configured key: inline PEM or a path to a PEM file
pub fn resolve_private_key(value: &str) -> Result<RsaPrivateKey, CryptoError> {
    if value.trim_start().starts_with("-----BEGIN") {
        parse_private_key(value)
    } else {
        load_private_key(Path::new(value))
    }
}

// =============================================================================
// SIGNING
// =============================================================================

/// Sign `message` with SHA-512 / PKCS#1 v1.5 and return it base64 encoded
pub fn sign_sha512(key: &RsaPrivateKey, message: &[u8]) -> Result<String, CryptoError> {
    let digest = Sha512::digest(message);
    let signature = key
        .sign(Pkcs1v15Sign::new::<Sha512>(), &digest)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    Ok(BASE64.encode(signature))
}

// =============================================================================
// HELPERS
// =============================================================================

/// Percent-encode everything but RFC 3986 unreserved characters
pub fn percent_encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

/// Like `percent_encode`, but leaves square brackets readable
///
/// Used for the signed parameter string, whose keys look like `1[0][name]`.
pub fn percent_encode_param(input: &str) -> String {
    urlencoding::encode(input).replace("%5B", "[").replace("%5D", "]")
}

/// Random request nonce (32 hex characters)
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    #[error("Unreadable key file: {0}")]
    Unreadable(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}
