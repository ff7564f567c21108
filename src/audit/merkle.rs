//! Merkle Tree for Audit Events
//!
//! Batch digest over a range of event hashes so a verified range can be
//! anchored by a single value. Parents are `SHA256(left || right)` over the
//! raw 32-byte hashes; an odd node at any level is paired with itself.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::audit::digest::decode_hash;
use crate::audit::entry::AuditEvent;
use crate::error::TrustChainError;

type Hash = [u8; 32];

fn parent(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn leaf(hash_hex: &str) -> Result<Hash, TrustChainError> {
    decode_hash(hash_hex)?.try_into().map_err(|_| {
        TrustChainError::InvalidPayload(format!("event hash {} is not 32 bytes", hash_hex))
    })
}

/// All levels of the tree, leaves first, root last.
fn build_levels(leaf_hashes: &[String]) -> Result<Vec<Vec<Hash>>, TrustChainError> {
    if leaf_hashes.is_empty() {
        return Err(TrustChainError::InvalidPayload(
            "Cannot build Merkle tree from empty range".to_string(),
        ));
    }

    let mut levels = vec![leaf_hashes
        .iter()
        .map(|h| leaf(h))
        .collect::<Result<Vec<_>, _>>()?];

    while let Some(current) = levels.last().filter(|l| l.len() > 1) {
        let next = current
            .chunks(2)
            .map(|pair| parent(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
        levels.push(next);
    }

    Ok(levels)
}

/// Merkle root over hex event hashes, hex-encoded.
pub fn merkle_root_of_hashes(leaf_hashes: &[String]) -> Result<String, TrustChainError> {
    let levels = build_levels(leaf_hashes)?;
    let root = levels
        .last()
        .and_then(|l| l.first())
        .map(hex::encode)
        .ok_or_else(|| TrustChainError::InvalidPayload("empty Merkle tree".to_string()))?;
    debug!("Merkle root over {} events: {}", leaf_hashes.len(), root);
    Ok(root)
}

/// Get Merkle root hash for a range of events
pub fn get_merkle_root(events: &[AuditEvent]) -> Result<String, TrustChainError> {
    let hashes: Vec<String> = events.iter().map(|e| e.hash.clone()).collect();
    merkle_root_of_hashes(&hashes)
}
