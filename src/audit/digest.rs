//! Digest Chain
//!
//! `hash = SHA256(canonical || decode_hex(prev_hash))`, hex-encoded lowercase.
//! Both the append path and the verifier go through these functions.

use sha2::{Digest, Sha256};

use crate::error::TrustChainError;

/// Compute the raw chain digest for canonical bytes and the previous hash.
pub fn digest_bytes(
    canonical: &[u8],
    prev_hash: Option<&str>,
) -> Result<[u8; 32], TrustChainError> {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    if let Some(prev) = prev_hash.filter(|p| !p.is_empty()) {
        hasher.update(decode_hash(prev)?);
    }
    Ok(hasher.finalize().into())
}

/// Compute the hex-encoded chain digest.
pub fn digest(canonical: &[u8], prev_hash: Option<&str>) -> Result<String, TrustChainError> {
    Ok(hex::encode(digest_bytes(canonical, prev_hash)?))
}

/// Decode a stored hex hash into the bytes that were signed.
pub fn decode_hash(hash_hex: &str) -> Result<Vec<u8>, TrustChainError> {
    hex::decode(hash_hex)
        .map_err(|e| TrustChainError::InvalidPayload(format!("invalid hex hash {:?}: {}", hash_hex, e)))
}
