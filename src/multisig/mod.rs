//! Multisig Approval
//!
//! Signer registry and the N-of-M proposal approval engine.

pub mod engine;
pub mod registry;
pub mod types;

pub use engine::MultisigEngine;
pub use registry::SignerRegistry;
pub use types::{
    approval_message, Approval, ApprovalOutcome, NewProposal, Proposal, ProposalStatus,
    SignerRecord, SignerRole, SignerStatus,
};
