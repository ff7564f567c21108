//! Audit Event
//!
//! Immutable, hash-linked record of one state-changing action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::canonical::canonicalize_json;
use crate::error::TrustChainError;

/// One row of the audit chain. Field names on the wire match the export
/// format exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub signature: Option<String>,
    pub signer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Canonical bytes of the payload.
    pub fn canonical_payload(&self) -> Result<Vec<u8>, TrustChainError> {
        canonicalize_json(&self.payload)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.as_deref().map_or(false, |s| !s.is_empty())
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} {} hash={} prev={}",
            self.event_type,
            self.id,
            short(&self.hash),
            self.prev_hash.as_deref().map(short).unwrap_or("null")
        )
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, TrustChainError> {
        let payload_text: String = row.try_get("payload")?;
        let payload = serde_json::from_str(&payload_text).map_err(|e| {
            TrustChainError::InvalidPayload(format!("stored payload is not JSON: {}", e))
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            payload,
            prev_hash: row.try_get("prev_hash")?,
            hash: row.try_get("hash")?,
            signature: row.try_get("signature")?,
            signer_id: row.try_get("signer_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
impl AuditEvent {
    /// Stored hash matches the payload and `prev_hash`.
    pub(crate) fn verify_hash(&self) -> bool {
        self.canonical_payload()
            .and_then(|canonical| crate::audit::digest::digest(&canonical, self.prev_hash.as_deref()))
            .map_or(false, |h| h == self.hash)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
