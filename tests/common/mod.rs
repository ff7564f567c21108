#![allow(dead_code)]

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use trustchain::audit::{AuditEvent, AuditLogger};
use trustchain::config::ApprovalBinding;
use trustchain::crypto::SecretKeyMaterial;
use trustchain::database::Database;
use trustchain::multisig::{MultisigEngine, NewProposal, SignerRegistry, SignerRole};
use trustchain::signing::{MockBackend, ResolvedSigner};

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// File-backed database so several connections can contend for the write lock
pub async fn setup_file_db(dir: &tempfile::TempDir) -> Database {
    let url = format!("sqlite://{}", dir.path().join("trustchain.db").display());
    Database::new(&url)
        .await
        .expect("Failed to create file database")
}

/// Deterministic HMAC signer
pub fn mock_signer(strict: bool) -> ResolvedSigner {
    ResolvedSigner::from_backend(Arc::new(MockBackend::default()), strict)
}

pub fn mock_logger(db: &Database) -> AuditLogger {
    AuditLogger::new(db.clone(), mock_signer(false))
}

/// Append `count` settlement events
pub async fn append_events(logger: &AuditLogger, count: usize) -> Vec<AuditEvent> {
    let mut events = Vec::with_capacity(count);
    for i in 0..count {
        let event = logger
            .append("marketplace.settlement", json!({ "order": i, "amount": "10.50" }))
            .await
            .expect("append failed");
        events.push(event);
    }
    events
}

/// Generate Ed25519 signers named signer-0, signer-1, ...
pub fn generate_test_signers(count: usize) -> Vec<(String, SecretKeyMaterial)> {
    (0..count)
        .map(|i| (format!("signer-{}", i), SecretKeyMaterial::generate_ed25519()))
        .collect()
}

pub struct TestMultisig {
    pub db: Database,
    pub logger: AuditLogger,
    pub registry: SignerRegistry,
    pub engine: MultisigEngine,
    pub signers: Vec<(String, SecretKeyMaterial)>,
}

impl TestMultisig {
    pub async fn new(db: Database, signer_count: usize, binding: ApprovalBinding) -> Self {
        let logger = mock_logger(&db);
        let registry = SignerRegistry::new(db.pool().clone()).with_audit(logger.clone());
        let engine = MultisigEngine::new(db.clone(), logger.clone(), binding);

        let signers = generate_test_signers(signer_count);
        for (id, key) in &signers {
            let public_key = key.public_key().to_encoded().expect("encode public key");
            registry
                .register(id, &public_key, SignerRole::Signer, None)
                .await
                .expect("register signer");
        }

        Self {
            db,
            logger,
            registry,
            engine,
            signers,
        }
    }

    pub fn signer_ids(&self) -> Vec<String> {
        self.signers.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn proposal(&self, threshold: u32) -> NewProposal {
        NewProposal {
            title: "Raise agent resource quota".to_string(),
            description: "Allow the orchestrator pool to scale to 64 workers".to_string(),
            payload: json!({ "pool": "orchestrator", "maxWorkers": 64 }),
            signer_set: self.signer_ids(),
            required_threshold: threshold,
            created_by: "ops".to_string(),
        }
    }

    /// Approval signature by signer `index` over the proposal's message
    pub async fn sign(&self, proposal_id: &str, index: usize) -> String {
        let message = self
            .engine
            .approval_message(proposal_id)
            .await
            .expect("approval message");
        let signature = self.signers[index]
            .1
            .sign_message(&message)
            .expect("sign approval");
        STANDARD.encode(signature)
    }
}
