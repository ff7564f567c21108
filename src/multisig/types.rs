//! Multisig Types
//!
//! Signers, proposals and approvals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::canonical::{canonicalize, CanonicalValue};
use crate::config::ApprovalBinding;
use crate::error::TrustChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerStatus {
    Active,
    Revoked,
}

impl SignerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerStatus::Active => "active",
            SignerStatus::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for SignerStatus {
    type Err = TrustChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SignerStatus::Active),
            "revoked" => Ok(SignerStatus::Revoked),
            _ => Err(TrustChainError::InvalidPayload(format!("Unknown signer status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerRole {
    Signer,
    Operator,
}

impl SignerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerRole::Signer => "signer",
            SignerRole::Operator => "operator",
        }
    }
}

impl std::str::FromStr for SignerRole {
    type Err = TrustChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signer" => Ok(SignerRole::Signer),
            "operator" => Ok(SignerRole::Operator),
            _ => Err(TrustChainError::InvalidPayload(format!("Unknown signer role: {}", s))),
        }
    }
}

/// A registered signing identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerRecord {
    pub signer_id: String,
    pub public_key: String,
    pub key_type: String,
    pub role: SignerRole,
    pub status: SignerStatus,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SignerRecord {
    pub fn is_active(&self) -> bool {
        self.status == SignerStatus::Active
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, TrustChainError> {
        Ok(Self {
            signer_id: row.try_get("signer_id")?,
            public_key: row.try_get("public_key")?,
            key_type: row.try_get("key_type")?,
            role: row.try_get::<String, _>("role")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            comment: row.try_get("comment")?,
            created_at: row.try_get("created_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Applied,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Applied => "applied",
            ProposalStatus::Rejected => "rejected",
        }
    }

    /// Forward-only lifecycle: proposed -> approved -> applied, or
    /// proposed -> rejected.
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self, next),
            (ProposalStatus::Proposed, ProposalStatus::Approved)
                | (ProposalStatus::Proposed, ProposalStatus::Rejected)
                | (ProposalStatus::Approved, ProposalStatus::Applied)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Applied | ProposalStatus::Rejected)
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = TrustChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(ProposalStatus::Proposed),
            "approved" => Ok(ProposalStatus::Approved),
            "applied" => Ok(ProposalStatus::Applied),
            "rejected" => Ok(ProposalStatus::Rejected),
            _ => Err(TrustChainError::InvalidPayload(format!("Unknown proposal status: {}", s))),
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub signer_set: Vec<String>,
    pub required_threshold: u32,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub required_threshold: u32,
    /// Sorted, duplicate-free.
    pub signer_set: Vec<String>,
    pub status: ProposalStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
    pub applied_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Proposal {
    pub fn includes_signer(&self, signer_id: &str) -> bool {
        self.signer_set.binary_search_by(|s| s.as_str().cmp(signer_id)).is_ok()
    }

    /// Bytes an approval signature must cover.
    pub fn approval_message(&self, binding: ApprovalBinding) -> Result<Vec<u8>, TrustChainError> {
        approval_message(
            binding,
            &self.id,
            &self.title,
            &self.description,
            &self.payload,
            self.required_threshold,
            &self.signer_set,
        )
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, TrustChainError> {
        let payload: String = row.try_get("payload")?;
        let signer_set: String = row.try_get("signer_set")?;
        let threshold: i64 = row.try_get("required_threshold")?;

        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            payload: serde_json::from_str(&payload)?,
            required_threshold: u32::try_from(threshold).map_err(|_| {
                TrustChainError::InvalidPayload(format!("stored threshold {} out of range", threshold))
            })?,
            signer_set: serde_json::from_str(&signer_set)?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            approved_at: row.try_get("approved_at")?,
            applied_at: row.try_get("applied_at")?,
            applied_by: row.try_get("applied_by")?,
            rejected_at: row.try_get("rejected_at")?,
            rejected_by: row.try_get("rejected_by")?,
            rejection_reason: row.try_get("rejection_reason")?,
        })
    }
}

/// Approval target for the given binding mode.
///
/// `Canonical` covers the canonical encoding of
/// `{description, payload, proposalId, requiredThreshold, signerSet, title}`
/// with the signer set sorted; `ProposalId` covers the UTF-8 id alone.
pub fn approval_message(
    binding: ApprovalBinding,
    proposal_id: &str,
    title: &str,
    description: &str,
    payload: &serde_json::Value,
    required_threshold: u32,
    signer_set: &[String],
) -> Result<Vec<u8>, TrustChainError> {
    match binding {
        ApprovalBinding::ProposalId => Ok(proposal_id.as_bytes().to_vec()),
        ApprovalBinding::Canonical => {
            let mut signers: Vec<&String> = signer_set.iter().collect();
            signers.sort();
            signers.dedup();

            let value = CanonicalValue::map([
                ("description", CanonicalValue::from(description)),
                ("payload", CanonicalValue::from(payload)),
                ("proposalId", CanonicalValue::from(proposal_id)),
                ("requiredThreshold", CanonicalValue::from(u64::from(required_threshold))),
                (
                    "signerSet",
                    CanonicalValue::List(signers.into_iter().map(|s| CanonicalValue::from(s.as_str())).collect()),
                ),
                ("title", CanonicalValue::from(title)),
            ]);
            canonicalize(&value)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub proposal_id: String,
    pub signer_id: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, TrustChainError> {
        Ok(Self {
            proposal_id: row.try_get("proposal_id")?,
            signer_id: row.try_get("signer_id")?,
            signature: row.try_get("signature")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Result of a recorded approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub proposal: Proposal,
    pub approval: Approval,
    /// Distinct valid approvals after this one.
    pub approvals: u32,
    pub threshold_reached: bool,
}
