//! Chain Verification
//!
//! Replays a contiguous run of audit events, recomputing every digest and
//! checking linkage, signatures and timestamp order. Problems are reported
//! per row so one corrupted event does not hide the rest of the chain.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::audit::digest;
use crate::audit::entry::AuditEvent;
use crate::audit::export::load_export;
use crate::audit::logger::read_range;
use crate::audit::merkle::merkle_root_of_hashes;
use crate::crypto::PublicKeyMaterial;
use crate::error::TrustChainError;
use crate::multisig::SignerRegistry;
use crate::signing::{decode_b64, ResolvedSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    ChainBroken,
    HashMismatch,
    SigInvalid,
    SigUnverifiable,
    SignerUnknown,
    Unsigned,
    PayloadInvalid,
    TimestampRegression,
    GenesisPrevHash,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::ChainBroken => "CHAIN_BROKEN",
            IssueCode::HashMismatch => "HASH_MISMATCH",
            IssueCode::SigInvalid => "SIG_INVALID",
            IssueCode::SigUnverifiable => "SIG_UNVERIFIABLE",
            IssueCode::SignerUnknown => "SIGNER_UNKNOWN",
            IssueCode::Unsigned => "UNSIGNED",
            IssueCode::PayloadInvalid => "PAYLOAD_INVALID",
            IssueCode::TimestampRegression => "TIMESTAMP_REGRESSION",
            IssueCode::GenesisPrevHash => "GENESIS_PREV_HASH",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Failure,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    Valid,
    Invalid,
    Unsigned,
    Unverifiable,
    Skipped,
}

impl SignatureStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Valid => "valid",
            SignatureStatus::Invalid => "invalid",
            SignatureStatus::Unsigned => "unsigned",
            SignatureStatus::Unverifiable => "unverifiable",
            SignatureStatus::Skipped => "skipped",
        }
    }
}

/// Per-row outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowReport {
    pub index: usize,
    pub id: String,
    pub event_type: String,
    pub hash: String,
    pub chain_ok: bool,
    pub hash_ok: bool,
    pub signature: SignatureStatus,
    pub issues: Vec<Issue>,
}

impl RowReport {
    pub fn has_failure(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Failure)
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// One-line status for terminal output.
    pub fn line(&self) -> String {
        let status = if self.has_failure() {
            "FAIL"
        } else if self.issues.is_empty() {
            "ok"
        } else {
            "warn"
        };
        let mut line = format!(
            "{:<4} #{} {} {} chain={} hash={} sig={}",
            status,
            self.index,
            self.id,
            self.event_type,
            if self.chain_ok { "ok" } else { "broken" },
            if self.hash_ok { "ok" } else { "mismatch" },
            self.signature.as_str()
        );
        if !self.issues.is_empty() {
            let codes: Vec<&str> = self.issues.iter().map(|i| i.code.as_str()).collect();
            line.push_str(&format!(" [{}]", codes.join(",")));
        }
        line
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub rows: Vec<RowReport>,
    pub verified: usize,
    pub failures: usize,
    pub warnings: usize,
    pub head_hash: Option<String>,
    pub merkle_root: Option<String>,
}

impl VerificationReport {
    /// No row carries a failure.
    pub fn is_valid(&self) -> bool {
        self.failures == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows: {} verified, {} with failures, {} warnings{}",
            self.rows.len(),
            self.verified,
            self.failures,
            self.warnings,
            self.merkle_root
                .as_deref()
                .map(|r| format!(", merkle root {}", r))
                .unwrap_or_default()
        )
    }
}

/// What the first row of a verified range must link to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainAnchor {
    /// The range starts at the first event ever written.
    Genesis,
    /// The range continues after an event with this hash.
    Hash(String),
    /// Nothing is known about the predecessor; the first link is not checked.
    Unknown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Report unsigned rows as warnings instead of failures.
    pub allow_unsigned: bool,
}

/// Checks rows against the resolved backend, or against a pinned public key
/// when a row names a signer the backend does not hold.
pub struct ChainVerifier {
    signer: ResolvedSigner,
    keys: HashMap<String, PublicKeyMaterial>,
    options: VerifyOptions,
}

impl ChainVerifier {
    pub fn new(signer: ResolvedSigner) -> Self {
        Self {
            signer,
            keys: HashMap::new(),
            options: VerifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    /// Verify rows whose `signerId` is `kid` with this public key.
    pub fn with_key(mut self, kid: impl Into<String>, key: PublicKeyMaterial) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }

    /// Pin every registered signer key, revoked ones included, since rows
    /// signed before a revocation or rotation stay valid history.
    pub async fn with_registry_keys(mut self, pool: &SqlitePool) -> Result<Self, TrustChainError> {
        let records = SignerRegistry::new(pool.clone()).list(true).await?;
        for record in records {
            match PublicKeyMaterial::parse(&record.public_key) {
                Ok(key) => {
                    self.keys.insert(record.signer_id, key);
                }
                Err(e) => warn!("Skipping registry key {}: {}", record.signer_id, e),
            }
        }
        debug!("Verifier holds {} pinned keys", self.keys.len());
        Ok(self)
    }

    /// Verify rows from the live store.
    pub async fn verify_live(
        &self,
        pool: &SqlitePool,
        start_after_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<VerificationReport, TrustChainError> {
        let range = read_range(pool, start_after_id, limit).await?;
        let anchor = match range.anchor_hash {
            Some(hash) => ChainAnchor::Hash(hash),
            None => ChainAnchor::Genesis,
        };
        Ok(self.verify_events(&range.events, anchor).await)
    }

    /// Verify a frozen export file.
    pub async fn verify_export(
        &self,
        path: &Path,
        anchor: ChainAnchor,
    ) -> Result<VerificationReport, TrustChainError> {
        let events = load_export(path)?;
        Ok(self.verify_events(&events, anchor).await)
    }

    /// Verify an in-memory, causally ordered run of events.
    pub async fn verify_events(&self, events: &[AuditEvent], anchor: ChainAnchor) -> VerificationReport {
        let mut rows = Vec::with_capacity(events.len());
        let mut previous: Option<&AuditEvent> = None;

        for (index, event) in events.iter().enumerate() {
            let row = self.verify_row(index, event, previous, &anchor).await;
            if row.has_failure() {
                warn!("{}", row.line());
            }
            rows.push(row);
            previous = Some(event);
        }

        let failures = rows.iter().filter(|r| r.has_failure()).count();
        let warnings = rows
            .iter()
            .flat_map(|r| r.issues.iter())
            .filter(|i| i.severity == Severity::Warning)
            .count();

        let merkle_root = if events.is_empty() {
            None
        } else {
            let hashes: Vec<String> = events.iter().map(|e| e.hash.clone()).collect();
            match merkle_root_of_hashes(&hashes) {
                Ok(root) => Some(root),
                Err(e) => {
                    warn!("Merkle root unavailable: {}", e);
                    None
                }
            }
        };

        let report = VerificationReport {
            verified: rows.len() - failures,
            failures,
            warnings,
            head_hash: events.last().map(|e| e.hash.clone()),
            merkle_root,
            rows,
        };
        info!("Chain verification: {}", report.summary());
        report
    }

    async fn verify_row(
        &self,
        index: usize,
        event: &AuditEvent,
        previous: Option<&AuditEvent>,
        anchor: &ChainAnchor,
    ) -> RowReport {
        let mut issues = Vec::new();

        let chain_ok = self.check_link(event, previous, anchor, &mut issues);

        if let Some(prev) = previous {
            if event.created_at < prev.created_at {
                issues.push(failure(
                    IssueCode::TimestampRegression,
                    format!(
                        "createdAt {} is before previous {}",
                        fmt_time(event.created_at),
                        fmt_time(prev.created_at)
                    ),
                ));
            }
        }

        let recomputed = event
            .canonical_payload()
            .and_then(|canonical| digest::digest_bytes(&canonical, event.prev_hash.as_deref()));

        let (hash_ok, signature) = match recomputed {
            Err(e) => {
                issues.push(failure(IssueCode::PayloadInvalid, e.to_string()));
                (false, SignatureStatus::Skipped)
            }
            Ok(bytes) => {
                let recomputed_hex = hex::encode(bytes);
                let hash_ok = recomputed_hex == event.hash;
                if !hash_ok {
                    issues.push(failure(
                        IssueCode::HashMismatch,
                        format!("stored {} recomputed {}", event.hash, recomputed_hex),
                    ));
                }
                let status = self.check_signature(event, &bytes, &mut issues).await;
                (hash_ok, status)
            }
        };

        RowReport {
            index,
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            hash: event.hash.clone(),
            chain_ok,
            hash_ok,
            signature,
            issues,
        }
    }

    fn check_link(
        &self,
        event: &AuditEvent,
        previous: Option<&AuditEvent>,
        anchor: &ChainAnchor,
        issues: &mut Vec<Issue>,
    ) -> bool {
        let expected = match (previous, anchor) {
            (Some(prev), _) => Some(prev.hash.as_str()),
            (None, ChainAnchor::Hash(hash)) => Some(hash.as_str()),
            (None, ChainAnchor::Genesis) => {
                if let Some(prev_hash) = &event.prev_hash {
                    issues.push(Issue {
                        code: IssueCode::GenesisPrevHash,
                        severity: Severity::Warning,
                        message: format!("first event has prevHash {}", prev_hash),
                    });
                }
                return true;
            }
            (None, ChainAnchor::Unknown) => return true,
        };

        if event.prev_hash.as_deref() == expected {
            return true;
        }

        issues.push(failure(
            IssueCode::ChainBroken,
            format!(
                "prevHash {} does not match previous hash {}",
                event.prev_hash.as_deref().unwrap_or("null"),
                expected.unwrap_or("null")
            ),
        ));
        false
    }

    fn verify_pinned(&self, kid: &str, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError> {
        let Some(key) = self.keys.get(kid) else {
            return Ok(false);
        };
        match decode_b64(signature_b64) {
            Ok(signature) => key.verify_digest(digest, &signature),
            Err(_) => Ok(false),
        }
    }

    async fn check_signature(
        &self,
        event: &AuditEvent,
        digest: &[u8],
        issues: &mut Vec<Issue>,
    ) -> SignatureStatus {
        if !event.is_signed() {
            issues.push(Issue {
                code: IssueCode::Unsigned,
                severity: if self.options.allow_unsigned {
                    Severity::Warning
                } else {
                    Severity::Failure
                },
                message: "event has no signature".to_string(),
            });
            return SignatureStatus::Unsigned;
        }
        let signature = event.signature.as_deref().unwrap_or_default();

        let claimed = event.signer_id.as_deref().filter(|kid| !kid.is_empty());
        let outcome = match claimed {
            Some(kid) if self.keys.contains_key(kid) => self.verify_pinned(kid, signature, digest),
            Some(kid) if !self.signer.owns_kid(kid) => {
                issues.push(failure(
                    IssueCode::SignerUnknown,
                    format!(
                        "signed by {} but the verifier holds no key for it (backend kid {})",
                        kid,
                        self.signer.kid().unwrap_or("none")
                    ),
                ));
                return SignatureStatus::Unverifiable;
            }
            _ => self.signer.verify(signature, digest).await,
        };

        match outcome {
            Ok(true) => SignatureStatus::Valid,
            Ok(false) => {
                issues.push(failure(
                    IssueCode::SigInvalid,
                    format!(
                        "signature by {} does not verify",
                        event.signer_id.as_deref().unwrap_or("unknown signer")
                    ),
                ));
                SignatureStatus::Invalid
            }
            Err(e) => {
                issues.push(failure(IssueCode::SigUnverifiable, e.to_string()));
                SignatureStatus::Unverifiable
            }
        }
    }
}

fn failure(code: IssueCode, message: String) -> Issue {
    Issue {
        code,
        severity: Severity::Failure,
        message,
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize_json;
    use crate::crypto::SecretKeyMaterial;
    use crate::signing::{LocalKeyBackend, MockBackend, SigningBackend};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    async fn chain(len: usize) -> Vec<AuditEvent> {
        signed_chain(&MockBackend::default(), len).await
    }

    async fn signed_chain(backend: &dyn SigningBackend, len: usize) -> Vec<AuditEvent> {
        let start = Utc::now();
        let mut events: Vec<AuditEvent> = Vec::new();
        for i in 0..len {
            let payload = json!({ "seq": i, "kind": "alloc" });
            let prev_hash = events.last().map(|e| e.hash.clone());
            let bytes = digest::digest_bytes(
                &canonicalize_json(&payload).unwrap(),
                prev_hash.as_deref(),
            )
            .unwrap();
            let signed = backend.sign(&bytes).await.unwrap();
            events.push(AuditEvent {
                id: format!("evt-{}", i + 1),
                event_type: "alloc".to_string(),
                payload,
                prev_hash,
                hash: hex::encode(bytes),
                signature: Some(signed.signature_b64),
                signer_id: Some(signed.kid),
                created_at: start + Duration::seconds(i as i64),
            });
        }
        events
    }

    fn verifier() -> ChainVerifier {
        ChainVerifier::new(ResolvedSigner::from_backend(
            Arc::new(MockBackend::default()),
            false,
        ))
    }

    #[tokio::test]
    async fn test_clean_chain_verifies() {
        let events = chain(4).await;
        let report = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        assert!(report.is_valid(), "{}", report.summary());
        assert_eq!(report.verified, 4);
        assert!(report.merkle_root.is_some());
        assert_eq!(report.head_hash.as_deref(), Some(events[3].hash.as_str()));
        assert!(report.rows.iter().all(|r| r.signature == SignatureStatus::Valid));
    }

    #[tokio::test]
    async fn test_corrupted_prev_hash_breaks_only_that_row() {
        let mut events = chain(3).await;
        events[1].prev_hash = Some("00".repeat(32));

        let report = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        assert!(!report.is_valid());
        assert!(report.rows[0].issues.is_empty());
        assert!(report.rows[1].has_issue(IssueCode::ChainBroken));
        assert!(!report.rows[1].chain_ok);
        assert!(report.rows[2].issues.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_payload_is_hash_mismatch() {
        let mut events = chain(3).await;
        events[2].payload = json!({ "seq": 2, "kind": "free" });

        let report = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        let row = &report.rows[2];
        assert!(row.has_issue(IssueCode::HashMismatch));
        assert!(row.has_issue(IssueCode::SigInvalid));
        assert!(row.chain_ok);
    }

    #[tokio::test]
    async fn test_forged_signature_is_sig_invalid() {
        let mut events = chain(2).await;
        events[0].signature = Some(crate::signing::encode_b64(&[0u8; 32]));

        let report = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        assert_eq!(report.rows.iter().filter(|r| r.has_issue(IssueCode::SigInvalid)).count(), 1);
        assert!(report.rows[0].hash_ok);
    }

    #[tokio::test]
    async fn test_unsigned_policy() {
        let mut events = chain(2).await;
        events[1].signature = None;

        let strict = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        assert!(!strict.is_valid());
        assert!(strict.rows[1].has_issue(IssueCode::Unsigned));

        let relaxed = verifier()
            .with_options(VerifyOptions { allow_unsigned: true })
            .verify_events(&events, ChainAnchor::Genesis)
            .await;
        assert!(relaxed.is_valid());
        assert_eq!(relaxed.warnings, 1);
    }

    #[tokio::test]
    async fn test_anchor_handling() {
        let events = chain(4).await;
        let tail = &events[2..];

        let unknown = verifier().verify_events(tail, ChainAnchor::Unknown).await;
        assert!(unknown.is_valid());

        let anchored = verifier()
            .verify_events(tail, ChainAnchor::Hash(events[1].hash.clone()))
            .await;
        assert!(anchored.is_valid());

        let wrong = verifier()
            .verify_events(tail, ChainAnchor::Hash(events[0].hash.clone()))
            .await;
        assert!(wrong.rows[0].has_issue(IssueCode::ChainBroken));

        let genesis = verifier().verify_events(tail, ChainAnchor::Genesis).await;
        assert!(genesis.is_valid());
        assert!(genesis.rows[0].has_issue(IssueCode::GenesisPrevHash));
    }

    #[tokio::test]
    async fn test_timestamp_regression() {
        let mut events = chain(3).await;
        events[2].created_at = events[0].created_at - Duration::seconds(5);

        let report = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        assert!(report.rows[2].has_issue(IssueCode::TimestampRegression));
        assert_eq!(report.failures, 1);
    }

    #[tokio::test]
    async fn test_missing_backend_is_unverifiable() {
        let events = chain(1).await;
        let report = ChainVerifier::new(ResolvedSigner::unsigned(false))
            .verify_events(&events, ChainAnchor::Genesis)
            .await;
        assert_eq!(report.rows[0].signature, SignatureStatus::Unverifiable);
        assert!(!report.is_valid());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_payload_invalid() {
        let mut events = chain(2).await;
        events[1].prev_hash = Some("zz".to_string());

        let report = verifier().verify_events(&events, ChainAnchor::Genesis).await;
        let row = &report.rows[1];
        assert!(row.has_issue(IssueCode::PayloadInvalid));
        assert_eq!(row.signature, SignatureStatus::Skipped);
        assert!(row.line().starts_with("FAIL"));
    }

    fn local_ed25519(kid: &str) -> (LocalKeyBackend, PublicKeyMaterial) {
        let secret = SecretKeyMaterial::generate_ed25519();
        let public = secret.public_key();
        (LocalKeyBackend::asymmetric(secret, Some(kid.to_string())).unwrap(), public)
    }

    #[tokio::test]
    async fn test_rows_from_a_rotated_key_need_a_pinned_key() {
        let (old_key, old_public) = local_ed25519("key-a");
        let (new_key, _) = local_ed25519("key-b");
        let events = signed_chain(&old_key, 2).await;
        let current = ResolvedSigner::from_backend(Arc::new(new_key), false);

        let unpinned = ChainVerifier::new(current.clone())
            .verify_events(&events, ChainAnchor::Genesis)
            .await;
        assert_eq!(unpinned.failures, 2);
        assert!(unpinned.rows.iter().all(|r| r.has_issue(IssueCode::SignerUnknown)));
        assert!(!unpinned.rows[0].has_issue(IssueCode::SigInvalid));

        let pinned = ChainVerifier::new(current)
            .with_key("key-a", old_public)
            .verify_events(&events, ChainAnchor::Genesis)
            .await;
        assert!(pinned.is_valid(), "{}", pinned.summary());
        assert!(pinned.rows.iter().all(|r| r.signature == SignatureStatus::Valid));
    }

    #[tokio::test]
    async fn test_claimed_signer_must_match_the_verifying_key() {
        let (key_a, public_a) = local_ed25519("key-a");
        let (key_b, public_b) = local_ed25519("key-b");
        let mut events = signed_chain(&key_a, 2).await;
        // Relabel a row as the other key's work
        events[1].signer_id = Some("key-b".to_string());

        let report = ChainVerifier::new(ResolvedSigner::from_backend(Arc::new(key_b), false))
            .with_key("key-a", public_a)
            .verify_events(&events, ChainAnchor::Genesis)
            .await;
        assert!(report.rows[0].issues.is_empty());
        assert!(report.rows[1].has_issue(IssueCode::SigInvalid));

        let report = ChainVerifier::new(ResolvedSigner::unsigned(false))
            .with_key("key-a", public_b)
            .verify_events(&events[..1], ChainAnchor::Genesis)
            .await;
        assert!(report.rows[0].has_issue(IssueCode::SigInvalid));
    }

    #[tokio::test]
    async fn test_registry_keys_are_pinned() {
        let db = crate::database::Database::new_in_memory().await.unwrap();
        let (key_a, public_a) = local_ed25519("key-a");
        SignerRegistry::new(db.pool().clone())
            .register(
                "key-a",
                &public_a.to_encoded().unwrap(),
                crate::multisig::SignerRole::Signer,
                None,
            )
            .await
            .unwrap();
        let events = signed_chain(&key_a, 3).await;

        let report = ChainVerifier::new(ResolvedSigner::unsigned(false))
            .with_registry_keys(db.pool())
            .await
            .unwrap()
            .verify_events(&events, ChainAnchor::Genesis)
            .await;
        assert!(report.is_valid(), "{}", report.summary());
    }
}
