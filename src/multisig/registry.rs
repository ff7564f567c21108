//! Signer Registry
//!
//! Registered identities whose public keys verify approval signatures.

use chrono::Utc;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::types::{SignerRecord, SignerRole, SignerStatus};
use crate::audit::AuditLogger;
use crate::crypto::PublicKeyMaterial;
use crate::error::TrustChainError;

const SIGNER_COLUMNS: &str =
    "signer_id, public_key, key_type, role, status, comment, created_at, revoked_at";

#[derive(Clone)]
pub struct SignerRegistry {
    pool: SqlitePool,
    audit: Option<AuditLogger>,
}

impl SignerRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, audit: None }
    }

    /// Record registrations and revocations on the audit chain.
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Register a signer. The public key must parse in one of the supported
    /// formats.
    pub async fn register(
        &self,
        signer_id: &str,
        public_key: &str,
        role: SignerRole,
        comment: Option<&str>,
    ) -> Result<SignerRecord, TrustChainError> {
        if signer_id.trim().is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "signer id must not be empty".to_string(),
            ));
        }
        let key = PublicKeyMaterial::parse(public_key)?;
        let public_key = public_key.trim();

        let record = SignerRecord {
            signer_id: signer_id.to_string(),
            public_key: public_key.to_string(),
            key_type: key.key_type().to_string(),
            role,
            status: SignerStatus::Active,
            comment: comment.map(str::to_string),
            created_at: Utc::now(),
            revoked_at: None,
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO signers (signer_id, public_key, key_type, role, status, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(signer_id) DO NOTHING
            "#,
        )
        .bind(&record.signer_id)
        .bind(&record.public_key)
        .bind(&record.key_type)
        .bind(record.role.as_str())
        .bind(record.status.as_str())
        .bind(&record.comment)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(TrustChainError::InvalidPayload(format!(
                "signer {} is already registered",
                signer_id
            )));
        }

        if let Some(audit) = &self.audit {
            audit
                .append_in_tx(
                    &mut tx,
                    "signer.registered",
                    json!({
                        "signerId": record.signer_id,
                        "keyType": record.key_type,
                        "role": record.role.as_str(),
                    }),
                    None,
                )
                .await?;
        }

        tx.commit().await?;
        info!("Registered signer {} ({})", record.signer_id, record.key_type);
        Ok(record)
    }

    /// Revoke a signer. Its approvals stop counting toward any threshold
    /// evaluated afterwards.
    pub async fn revoke(
        &self,
        signer_id: &str,
        reason: Option<&str>,
    ) -> Result<SignerRecord, TrustChainError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE signers SET status = 'revoked', revoked_at = ? WHERE signer_id = ? AND status = 'active'",
        )
        .bind(now)
        .bind(signer_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return match get_signer(&mut tx, signer_id).await? {
                None => Err(TrustChainError::NotFound(format!("signer {}", signer_id))),
                Some(_) => Err(TrustChainError::InvalidTransition(format!(
                    "signer {} is already revoked",
                    signer_id
                ))),
            };
        }

        if let Some(audit) = &self.audit {
            audit
                .append_in_tx(
                    &mut tx,
                    "signer.revoked",
                    json!({ "signerId": signer_id, "reason": reason }),
                    None,
                )
                .await?;
        }

        let record = get_signer(&mut tx, signer_id)
            .await?
            .ok_or_else(|| TrustChainError::NotFound(format!("signer {}", signer_id)))?;
        tx.commit().await?;

        warn!("Revoked signer {}", signer_id);
        Ok(record)
    }

    pub async fn get(&self, signer_id: &str) -> Result<Option<SignerRecord>, TrustChainError> {
        let mut conn = self.pool.acquire().await?;
        get_signer(&mut conn, signer_id).await
    }

    pub async fn list(&self, include_revoked: bool) -> Result<Vec<SignerRecord>, TrustChainError> {
        let sql = if include_revoked {
            format!("SELECT {} FROM signers ORDER BY signer_id", SIGNER_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM signers WHERE status = 'active' ORDER BY signer_id",
                SIGNER_COLUMNS
            )
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(SignerRecord::from_row).collect()
    }
}

/// Load a signer on an existing connection or transaction.
pub(crate) async fn get_signer(
    conn: &mut SqliteConnection,
    signer_id: &str,
) -> Result<Option<SignerRecord>, TrustChainError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM signers WHERE signer_id = ?",
        SIGNER_COLUMNS
    ))
    .bind(signer_id)
    .fetch_optional(conn)
    .await?;
    row.map(|r| SignerRecord::from_row(&r)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKeyMaterial;
    use crate::database::Database;

    fn public_pem() -> String {
        SecretKeyMaterial::generate_ed25519()
            .public_key()
            .to_encoded()
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let db = Database::new_in_memory().await.unwrap();
        let registry = SignerRegistry::new(db.pool().clone());

        let record = registry
            .register("alice", &public_pem(), SignerRole::Signer, Some("primary"))
            .await
            .unwrap();
        assert_eq!(record.key_type, "ed25519");
        assert!(record.is_active());

        let loaded = registry.get("alice").await.unwrap().unwrap();
        assert_eq!(loaded.public_key, record.public_key);
        assert_eq!(loaded.comment.as_deref(), Some("primary"));
        assert!(registry.get("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_registration() {
        let db = Database::new_in_memory().await.unwrap();
        let registry = SignerRegistry::new(db.pool().clone());

        registry
            .register("alice", &public_pem(), SignerRole::Signer, None)
            .await
            .unwrap();
        assert!(registry
            .register("alice", &public_pem(), SignerRole::Signer, None)
            .await
            .is_err());
        assert!(matches!(
            registry.register("bob", "garbage", SignerRole::Signer, None).await,
            Err(TrustChainError::CryptoError(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke() {
        let db = Database::new_in_memory().await.unwrap();
        let registry = SignerRegistry::new(db.pool().clone());
        registry
            .register("alice", &public_pem(), SignerRole::Operator, None)
            .await
            .unwrap();

        let revoked = registry.revoke("alice", Some("lost key")).await.unwrap();
        assert_eq!(revoked.status, SignerStatus::Revoked);
        assert!(revoked.revoked_at.is_some());

        assert!(matches!(
            registry.revoke("alice", None).await,
            Err(TrustChainError::InvalidTransition(_))
        ));
        assert!(matches!(
            registry.revoke("nobody", None).await,
            Err(TrustChainError::NotFound(_))
        ));

        assert!(registry.list(false).await.unwrap().is_empty());
        assert_eq!(registry.list(true).await.unwrap().len(), 1);
    }
}
