//! Multisig Approval Engine
//!
//! Proposal lifecycle gated by N-of-M signer approvals. Every operation that
//! reads an approval count opens its transaction by writing the proposal
//! row, so concurrent approvals of one proposal queue and exactly one of
//! them performs the threshold transition.

use std::future::Future;

use chrono::Utc;
use serde_json::json;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::get_signer;
use super::types::{Approval, ApprovalOutcome, NewProposal, Proposal, ProposalStatus};
use crate::audit::AuditLogger;
use crate::canonical::canonicalize_json;
use crate::config::ApprovalBinding;
use crate::crypto::verify_encoded;
use crate::database::Database;
use crate::error::TrustChainError;

const PROPOSAL_COLUMNS: &str = "id, title, description, payload, required_threshold, signer_set, \
     status, created_by, created_at, updated_at, approved_at, applied_at, applied_by, \
     rejected_at, rejected_by, rejection_reason";

#[derive(Clone)]
pub struct MultisigEngine {
    db: Database,
    audit: AuditLogger,
    binding: ApprovalBinding,
}

impl MultisigEngine {
    pub fn new(db: Database, audit: AuditLogger, binding: ApprovalBinding) -> Self {
        Self { db, audit, binding }
    }

    pub fn binding(&self) -> ApprovalBinding {
        self.binding
    }

    /// Persist a new proposal in `proposed` state.
    pub async fn create_proposal(&self, new: NewProposal) -> Result<Proposal, TrustChainError> {
        if new.title.trim().is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "proposal title must not be empty".to_string(),
            ));
        }
        if new.created_by.trim().is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "proposal creator must not be empty".to_string(),
            ));
        }
        if new.signer_set.is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "signer set must not be empty".to_string(),
            ));
        }

        let mut signer_set = new.signer_set.clone();
        signer_set.sort();
        signer_set.dedup();
        if signer_set.len() != new.signer_set.len() {
            return Err(TrustChainError::InvalidPayload(
                "signer set contains duplicate signer ids".to_string(),
            ));
        }
        if signer_set.iter().any(|s| s.trim().is_empty()) {
            return Err(TrustChainError::InvalidPayload(
                "signer set contains an empty signer id".to_string(),
            ));
        }

        let threshold = new.required_threshold;
        if threshold < 1 || threshold as usize > signer_set.len() {
            return Err(TrustChainError::InvalidPayload(format!(
                "threshold {} must be between 1 and {}",
                threshold,
                signer_set.len()
            )));
        }

        let payload_text = String::from_utf8(canonicalize_json(&new.payload)?).map_err(|e| {
            TrustChainError::InvalidPayload(format!("canonical payload is not UTF-8: {}", e))
        })?;
        let signer_set_text = serde_json::to_string(&signer_set)?;

        let now = Utc::now();
        let proposal = Proposal {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            description: new.description,
            payload: new.payload,
            required_threshold: threshold,
            signer_set,
            status: ProposalStatus::Proposed,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            approved_at: None,
            applied_at: None,
            applied_by: None,
            rejected_at: None,
            rejected_by: None,
            rejection_reason: None,
        };

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO proposals
                (id, title, description, payload, required_threshold, signer_set, status, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&proposal.id)
        .bind(&proposal.title)
        .bind(&proposal.description)
        .bind(&payload_text)
        .bind(i64::from(proposal.required_threshold))
        .bind(&signer_set_text)
        .bind(proposal.status.as_str())
        .bind(&proposal.created_by)
        .bind(proposal.created_at)
        .bind(proposal.updated_at)
        .execute(&mut *tx)
        .await?;

        for signer_id in &proposal.signer_set {
            match get_signer(&mut tx, signer_id).await? {
                Some(record) if record.is_active() => {}
                Some(_) => warn!("Proposal {} lists revoked signer {}", proposal.id, signer_id),
                None => warn!("Proposal {} lists unregistered signer {}", proposal.id, signer_id),
            }
        }

        self.audit
            .append_in_tx(
                &mut tx,
                "multisig.proposal.created",
                json!({
                    "proposalId": proposal.id,
                    "title": proposal.title,
                    "requiredThreshold": proposal.required_threshold,
                    "signerSet": proposal.signer_set,
                    "createdBy": proposal.created_by,
                }),
                None,
            )
            .await?;

        tx.commit().await?;

        info!(
            "Created proposal {} ({}-of-{}) by {}",
            proposal.id,
            proposal.required_threshold,
            proposal.signer_set.len(),
            proposal.created_by
        );
        Ok(proposal)
    }

    /// Record one signer's approval and move the proposal to `approved`
    /// when the threshold is reached.
    pub async fn approve(
        &self,
        proposal_id: &str,
        signer_id: &str,
        signature_b64: &str,
    ) -> Result<ApprovalOutcome, TrustChainError> {
        let mut tx = self.db.begin().await?;

        let mut proposal = lock_proposal(&mut tx, proposal_id).await?;

        // Eligibility first: a non-member is Unauthorized whatever the proposal state
        let signer = match get_signer(&mut tx, signer_id).await? {
            Some(s) => s,
            None => {
                return Err(TrustChainError::Unauthorized(format!(
                    "signer {} is not registered",
                    signer_id
                )))
            }
        };
        if !signer.is_active() {
            return Err(TrustChainError::Unauthorized(format!(
                "signer {} is revoked",
                signer_id
            )));
        }
        if !proposal.includes_signer(signer_id) {
            return Err(TrustChainError::Unauthorized(format!(
                "signer {} is not eligible for proposal {}",
                signer_id, proposal_id
            )));
        }

        if proposal.status != ProposalStatus::Proposed {
            return Err(TrustChainError::InvalidTransition(format!(
                "proposal {} is {} and no longer accepts approvals",
                proposal_id, proposal.status
            )));
        }

        let message = proposal.approval_message(self.binding)?;
        if !verify_encoded(&signer.public_key, &message, signature_b64)? {
            warn!(
                "Rejected approval of {} by {}: signature does not verify",
                proposal_id, signer_id
            );
            return Err(TrustChainError::SignatureInvalid(format!(
                "approval signature from {} does not verify for proposal {}",
                signer_id, proposal_id
            )));
        }

        let approval = Approval {
            proposal_id: proposal_id.to_string(),
            signer_id: signer_id.to_string(),
            signature: signature_b64.to_string(),
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO approvals (proposal_id, signer_id, signature, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(proposal_id, signer_id) DO NOTHING
            "#,
        )
        .bind(&approval.proposal_id)
        .bind(&approval.signer_id)
        .bind(&approval.signature)
        .bind(approval.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!("Duplicate approval of {} by {}", proposal_id, signer_id);
            return Err(TrustChainError::duplicate_approval(proposal_id, signer_id));
        }

        let approvals = count_valid_approvals(&mut tx, proposal_id).await?;
        let threshold_reached = approvals >= proposal.required_threshold;

        self.audit
            .append_in_tx(
                &mut tx,
                "multisig.approval.recorded",
                json!({
                    "proposalId": proposal_id,
                    "signerId": signer_id,
                    "approvals": approvals,
                    "requiredThreshold": proposal.required_threshold,
                }),
                None,
            )
            .await?;

        if threshold_reached {
            let now = Utc::now();
            sqlx::query(
                "UPDATE proposals SET status = 'approved', approved_at = ?, updated_at = ? WHERE id = ? AND status = 'proposed'",
            )
            .bind(now)
            .bind(now)
            .bind(proposal_id)
            .execute(&mut *tx)
            .await?;

            self.audit
                .append_in_tx(
                    &mut tx,
                    "multisig.proposal.approved",
                    json!({
                        "proposalId": proposal_id,
                        "approvals": approvals,
                        "requiredThreshold": proposal.required_threshold,
                    }),
                    None,
                )
                .await?;

            proposal.status = ProposalStatus::Approved;
            proposal.approved_at = Some(now);
            proposal.updated_at = now;
        }

        tx.commit().await?;

        info!(
            "Approval of {} by {} recorded ({}/{})",
            proposal_id, signer_id, approvals, proposal.required_threshold
        );
        if threshold_reached {
            info!("Proposal {} reached its approval threshold", proposal_id);
        }

        Ok(ApprovalOutcome {
            proposal,
            approval,
            approvals,
            threshold_reached,
        })
    }

    /// Mark an approved proposal as applied.
    pub async fn apply(&self, proposal_id: &str, actor_id: &str) -> Result<Proposal, TrustChainError> {
        self.apply_with(proposal_id, actor_id, |_| async { Ok(()) })
            .await
    }

    /// Run `action` as the gated operation and mark the proposal applied.
    ///
    /// The threshold is recounted inside the transaction before `action`
    /// runs; if `action` fails the proposal stays `approved`.
    pub async fn apply_with<F, Fut>(
        &self,
        proposal_id: &str,
        actor_id: &str,
        action: F,
    ) -> Result<Proposal, TrustChainError>
    where
        F: FnOnce(Proposal) -> Fut,
        Fut: Future<Output = Result<(), TrustChainError>>,
    {
        if actor_id.trim().is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "actor id must not be empty".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;

        let mut proposal = lock_proposal(&mut tx, proposal_id).await?;
        if proposal.status.is_terminal() {
            return Err(TrustChainError::invalid_transition(
                proposal_id,
                proposal.status.as_str(),
                ProposalStatus::Applied.as_str(),
            ));
        }

        let approvals = count_valid_approvals(&mut tx, proposal_id).await?;
        if approvals < proposal.required_threshold {
            warn!(
                "Refusing to apply {}: {}/{} valid approvals",
                proposal_id, approvals, proposal.required_threshold
            );
            return Err(TrustChainError::insufficient_approvals(
                approvals as usize,
                proposal.required_threshold as usize,
            ));
        }
        if !proposal.status.can_transition_to(ProposalStatus::Applied) {
            return Err(TrustChainError::invalid_transition(
                proposal_id,
                proposal.status.as_str(),
                ProposalStatus::Applied.as_str(),
            ));
        }

        action(proposal.clone()).await?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE proposals SET status = 'applied', applied_at = ?, applied_by = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(actor_id)
        .bind(now)
        .bind(proposal_id)
        .execute(&mut *tx)
        .await?;

        self.audit
            .append_in_tx(
                &mut tx,
                "multisig.proposal.applied",
                json!({
                    "proposalId": proposal_id,
                    "appliedBy": actor_id,
                    "approvals": approvals,
                }),
                None,
            )
            .await?;

        tx.commit().await?;

        proposal.status = ProposalStatus::Applied;
        proposal.applied_at = Some(now);
        proposal.applied_by = Some(actor_id.to_string());
        proposal.updated_at = now;

        info!("Proposal {} applied by {}", proposal_id, actor_id);
        Ok(proposal)
    }

    /// Close a proposal that has not been approved.
    pub async fn reject(
        &self,
        proposal_id: &str,
        actor_id: &str,
        reason: Option<&str>,
    ) -> Result<Proposal, TrustChainError> {
        let mut tx = self.db.begin().await?;

        let mut proposal = lock_proposal(&mut tx, proposal_id).await?;
        if !proposal.status.can_transition_to(ProposalStatus::Rejected) {
            return Err(TrustChainError::invalid_transition(
                proposal_id,
                proposal.status.as_str(),
                ProposalStatus::Rejected.as_str(),
            ));
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE proposals SET status = 'rejected', rejected_at = ?, rejected_by = ?, rejection_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(actor_id)
        .bind(reason)
        .bind(now)
        .bind(proposal_id)
        .execute(&mut *tx)
        .await?;

        self.audit
            .append_in_tx(
                &mut tx,
                "multisig.proposal.rejected",
                json!({
                    "proposalId": proposal_id,
                    "rejectedBy": actor_id,
                    "reason": reason,
                }),
                None,
            )
            .await?;

        tx.commit().await?;

        proposal.status = ProposalStatus::Rejected;
        proposal.rejected_at = Some(now);
        proposal.rejected_by = Some(actor_id.to_string());
        proposal.rejection_reason = reason.map(str::to_string);
        proposal.updated_at = now;

        info!("Proposal {} rejected by {}", proposal_id, actor_id);
        Ok(proposal)
    }

    pub async fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>, TrustChainError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM proposals WHERE id = ?",
            PROPOSAL_COLUMNS
        ))
        .bind(proposal_id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(|r| Proposal::from_row(&r)).transpose()
    }

    /// Proposals oldest first, optionally filtered by status.
    pub async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, TrustChainError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM proposals WHERE status = ? ORDER BY created_at ASC",
                    PROPOSAL_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM proposals ORDER BY created_at ASC",
                    PROPOSAL_COLUMNS
                ))
                .fetch_all(self.db.pool())
                .await?
            }
        };
        rows.iter().map(Proposal::from_row).collect()
    }

    pub async fn list_approvals(&self, proposal_id: &str) -> Result<Vec<Approval>, TrustChainError> {
        let rows = sqlx::query(
            "SELECT proposal_id, signer_id, signature, created_at FROM approvals WHERE proposal_id = ? ORDER BY id ASC",
        )
        .bind(proposal_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(Approval::from_row).collect()
    }

    /// Approvals from signers that are still active.
    pub async fn valid_approval_count(&self, proposal_id: &str) -> Result<u32, TrustChainError> {
        let mut conn = self.db.pool().acquire().await?;
        count_valid_approvals(&mut conn, proposal_id).await
    }

    /// Bytes a signer must sign to approve `proposal_id`.
    pub async fn approval_message(&self, proposal_id: &str) -> Result<Vec<u8>, TrustChainError> {
        let proposal = self
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| TrustChainError::NotFound(format!("proposal {}", proposal_id)))?;
        proposal.approval_message(self.binding)
    }
}

/// Write the proposal row so that concurrent transactions on it serialize,
/// then load it.
async fn lock_proposal(
    conn: &mut SqliteConnection,
    proposal_id: &str,
) -> Result<Proposal, TrustChainError> {
    let locked = sqlx::query("UPDATE proposals SET updated_at = updated_at WHERE id = ?")
        .bind(proposal_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if locked == 0 {
        return Err(TrustChainError::NotFound(format!("proposal {}", proposal_id)));
    }

    let row = sqlx::query(&format!(
        "SELECT {} FROM proposals WHERE id = ?",
        PROPOSAL_COLUMNS
    ))
    .bind(proposal_id)
    .fetch_one(&mut *conn)
    .await?;
    Proposal::from_row(&row)
}

async fn count_valid_approvals(
    conn: &mut SqliteConnection,
    proposal_id: &str,
) -> Result<u32, TrustChainError> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(DISTINCT a.signer_id) AS n
        FROM approvals a
        JOIN signers s ON s.signer_id = a.signer_id
        WHERE a.proposal_id = ? AND s.status = 'active'
        "#,
    )
    .bind(proposal_id)
    .fetch_one(conn)
    .await?;
    let n: i64 = row.try_get("n")?;
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKeyMaterial;
    use crate::multisig::registry::SignerRegistry;
    use crate::multisig::types::SignerRole;
    use crate::signing::{encode_b64, ResolvedSigner};

    struct Fixture {
        engine: MultisigEngine,
        registry: SignerRegistry,
        keys: Vec<(String, SecretKeyMaterial)>,
    }

    async fn fixture(signers: usize) -> Fixture {
        let db = Database::new_in_memory().await.unwrap();
        let audit = AuditLogger::new(db.clone(), ResolvedSigner::unsigned(false));
        let registry = SignerRegistry::new(db.pool().clone()).with_audit(audit.clone());
        let engine = MultisigEngine::new(db, audit, ApprovalBinding::Canonical);

        let mut keys = Vec::new();
        for i in 0..signers {
            let id = format!("signer-{}", i);
            let key = SecretKeyMaterial::generate_ed25519();
            registry
                .register(&id, &key.public_key().to_encoded().unwrap(), SignerRole::Signer, None)
                .await
                .unwrap();
            keys.push((id, key));
        }
        Fixture { engine, registry, keys }
    }

    fn new_proposal(signers: &[(String, SecretKeyMaterial)], threshold: u32) -> NewProposal {
        NewProposal {
            title: "Rotate settlement key".to_string(),
            description: "Replace the marketplace settlement key".to_string(),
            payload: json!({"keyId": "settle-2", "amount": 10}),
            signer_set: signers.iter().map(|(id, _)| id.clone()).collect(),
            required_threshold: threshold,
            created_by: "ops".to_string(),
        }
    }

    async fn sign(engine: &MultisigEngine, proposal_id: &str, key: &SecretKeyMaterial) -> String {
        let message = engine.approval_message(proposal_id).await.unwrap();
        encode_b64(&key.sign_message(&message).unwrap())
    }

    #[tokio::test]
    async fn test_create_validates_threshold_and_signer_set() {
        let f = fixture(2).await;

        let mut zero = new_proposal(&f.keys, 0);
        zero.required_threshold = 0;
        assert!(matches!(
            f.engine.create_proposal(zero).await,
            Err(TrustChainError::InvalidPayload(_))
        ));
        assert!(matches!(
            f.engine.create_proposal(new_proposal(&f.keys, 3)).await,
            Err(TrustChainError::InvalidPayload(_))
        ));

        let mut dup = new_proposal(&f.keys, 1);
        dup.signer_set.push("signer-0".to_string());
        assert!(matches!(
            f.engine.create_proposal(dup).await,
            Err(TrustChainError::InvalidPayload(_))
        ));

        let proposal = f.engine.create_proposal(new_proposal(&f.keys, 2)).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Proposed);
        let loaded = f.engine.get_proposal(&proposal.id).await.unwrap().unwrap();
        assert_eq!(loaded.signer_set, vec!["signer-0", "signer-1"]);
        assert_eq!(loaded.payload, proposal.payload);
    }

    #[tokio::test]
    async fn test_threshold_transition_and_duplicate() {
        let f = fixture(3).await;
        let proposal = f.engine.create_proposal(new_proposal(&f.keys, 2)).await.unwrap();

        let (id0, key0) = &f.keys[0];
        let sig0 = sign(&f.engine, &proposal.id, key0).await;
        let first = f.engine.approve(&proposal.id, id0, &sig0).await.unwrap();
        assert_eq!(first.approvals, 1);
        assert!(!first.threshold_reached);
        assert_eq!(first.proposal.status, ProposalStatus::Proposed);

        assert!(matches!(
            f.engine.approve(&proposal.id, id0, &sig0).await,
            Err(TrustChainError::DuplicateApproval(_))
        ));
        assert_eq!(f.engine.valid_approval_count(&proposal.id).await.unwrap(), 1);

        let (id1, key1) = &f.keys[1];
        let sig1 = sign(&f.engine, &proposal.id, key1).await;
        let second = f.engine.approve(&proposal.id, id1, &sig1).await.unwrap();
        assert!(second.threshold_reached);
        assert_eq!(second.proposal.status, ProposalStatus::Approved);

        let (id2, key2) = &f.keys[2];
        let sig2 = sign(&f.engine, &proposal.id, key2).await;
        assert!(matches!(
            f.engine.approve(&proposal.id, id2, &sig2).await,
            Err(TrustChainError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_without_vote() {
        let f = fixture(2).await;
        let proposal = f.engine.create_proposal(new_proposal(&f.keys, 1)).await.unwrap();

        let (id0, _) = &f.keys[0];
        let (_, other_key) = &f.keys[1];
        let wrong = sign(&f.engine, &proposal.id, other_key).await;
        assert!(matches!(
            f.engine.approve(&proposal.id, id0, &wrong).await,
            Err(TrustChainError::SignatureInvalid(_))
        ));
        assert!(matches!(
            f.engine.approve(&proposal.id, id0, "not base64!").await,
            Err(TrustChainError::SignatureInvalid(_))
        ));
        assert!(f.engine.list_approvals(&proposal.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_rechecks_threshold_after_revocation() {
        let f = fixture(2).await;
        let proposal = f.engine.create_proposal(new_proposal(&f.keys, 1)).await.unwrap();

        let (id0, key0) = &f.keys[0];
        let sig = sign(&f.engine, &proposal.id, key0).await;
        f.engine.approve(&proposal.id, id0, &sig).await.unwrap();

        f.registry.revoke(id0, Some("compromised")).await.unwrap();
        assert!(matches!(
            f.engine.apply(&proposal.id, "ops").await,
            Err(TrustChainError::InsufficientApprovals(_))
        ));
        let still = f.engine.get_proposal(&proposal.id).await.unwrap().unwrap();
        assert_eq!(still.status, ProposalStatus::Approved);
    }

    #[tokio::test]
    async fn test_apply_and_reject_are_terminal() {
        let f = fixture(1).await;
        let proposal = f.engine.create_proposal(new_proposal(&f.keys, 1)).await.unwrap();
        assert!(matches!(
            f.engine.apply(&proposal.id, "ops").await,
            Err(TrustChainError::InsufficientApprovals(_))
        ));

        let (id0, key0) = &f.keys[0];
        let sig = sign(&f.engine, &proposal.id, key0).await;
        f.engine.approve(&proposal.id, id0, &sig).await.unwrap();

        let failed = f
            .engine
            .apply_with(&proposal.id, "ops", |_| async {
                Err(TrustChainError::SigningRejected("downstream refused".to_string()))
            })
            .await;
        assert!(failed.is_err());

        let applied = f.engine.apply(&proposal.id, "ops").await.unwrap();
        assert_eq!(applied.status, ProposalStatus::Applied);
        assert_eq!(applied.applied_by.as_deref(), Some("ops"));

        assert!(matches!(
            f.engine.apply(&proposal.id, "ops").await,
            Err(TrustChainError::InvalidTransition(_))
        ));
        assert!(matches!(
            f.engine.reject(&proposal.id, "ops", None).await,
            Err(TrustChainError::InvalidTransition(_))
        ));

        let second = f.engine.create_proposal(new_proposal(&f.keys, 1)).await.unwrap();
        let rejected = f
            .engine
            .reject(&second.id, "ops", Some("superseded"))
            .await
            .unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(
            f.engine
                .list_proposals(Some(ProposalStatus::Rejected))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_proposal() {
        let f = fixture(1).await;
        assert!(matches!(
            f.engine.approve("missing", "signer-0", "c2ln").await,
            Err(TrustChainError::NotFound(_))
        ));
        assert!(f.engine.get_proposal("missing").await.unwrap().is_none());
    }
}
