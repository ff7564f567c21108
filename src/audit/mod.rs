//! Audit Chain
//!
//! Tamper-evident record of every state-changing action: canonical payloads
//! linked by a running SHA-256 digest, signed through the resolved signing
//! backend, and verifiable offline with Merkle anchoring of verified ranges.

pub mod digest;
pub mod entry;
pub mod export;
pub mod logger;
pub mod merkle;
pub mod verify;

pub use entry::AuditEvent;
pub use export::{load_export, write_export};
pub use logger::{read_range, AuditLogger, EventRange};
pub use merkle::get_merkle_root;
pub use verify::{ChainAnchor, ChainVerifier, IssueCode, VerificationReport, VerifyOptions};
