//! Audit Logger
//!
//! Append path for the audit chain: canonicalize, digest against the current
//! head, sign, persist. Every step runs inside one transaction whose first
//! statement writes the chain lock row, so concurrent appenders queue before
//! reading the head hash and the chain cannot fork.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::digest;
use crate::audit::entry::AuditEvent;
use crate::canonical::canonicalize_json;
use crate::database::Database;
use crate::error::TrustChainError;
use crate::signing::ResolvedSigner;

const EVENT_COLUMNS: &str =
    "seq, id, event_type, payload, prev_hash, hash, signature, signer_id, created_at";

/// Audit logger writing to the `audit_events` table
#[derive(Clone)]
pub struct AuditLogger {
    db: Database,
    signer: ResolvedSigner,
}

impl AuditLogger {
    pub fn new(db: Database, signer: ResolvedSigner) -> Self {
        Self { db, signer }
    }

    pub fn signer(&self) -> &ResolvedSigner {
        &self.signer
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Append one event as its own transaction.
    pub async fn append(
        &self,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<AuditEvent, TrustChainError> {
        let mut tx = self.db.begin().await?;
        let event = self.append_in_tx(&mut tx, event_type, payload, None).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Append keyed by a caller-supplied token. A retry with the same key
    /// returns the event recorded the first time.
    pub async fn append_idempotent(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> Result<AuditEvent, TrustChainError> {
        if idempotency_key.is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "idempotency key must not be empty".to_string(),
            ));
        }
        let mut tx = self.db.begin().await?;
        let event = self
            .append_in_tx(&mut tx, event_type, payload, Some(idempotency_key))
            .await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Append inside a caller's transaction so the event commits or rolls
    /// back together with the caller's own writes.
    ///
    /// On error nothing has been written that the caller should keep; in
    /// strict mode a signing failure is returned as an error so the caller
    /// drops the transaction.
    pub async fn append_in_tx(
        &self,
        conn: &mut SqliteConnection,
        event_type: &str,
        payload: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<AuditEvent, TrustChainError> {
        if event_type.trim().is_empty() {
            return Err(TrustChainError::InvalidPayload(
                "event type must not be empty".to_string(),
            ));
        }
        let canonical = canonicalize_json(&payload)?;

        // Take the chain lock before reading the head.
        sqlx::query("UPDATE audit_chain_lock SET appends = appends WHERE id = 1")
            .execute(&mut *conn)
            .await?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = find_by_idempotency_key(&mut *conn, key).await? {
                if existing.canonical_payload()? != canonical || existing.event_type != event_type {
                    return Err(TrustChainError::InvalidPayload(format!(
                        "idempotency key {} was already used for a different event",
                        key
                    )));
                }
                debug!("Idempotent replay of audit event {}", existing.id);
                return Ok(existing);
            }
        }

        let head = sqlx::query(&format!(
            "SELECT {} FROM audit_events ORDER BY seq DESC LIMIT 1",
            EVENT_COLUMNS
        ))
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| AuditEvent::from_row(&row))
        .transpose()?;

        let prev_hash = head.as_ref().map(|h| h.hash.clone());
        let created_at = monotonic_now(head.as_ref().map(|h| h.created_at));

        let hash_bytes = digest::digest_bytes(&canonical, prev_hash.as_deref())?;
        let hash = hex::encode(hash_bytes);

        let signed = self.signer.sign_for_append(&hash_bytes).await?;
        let (signature, signer_id) = match signed {
            Some(s) => (Some(s.signature_b64), Some(s.kid)),
            None => (None, None),
        };

        let canonical_text = String::from_utf8(canonical).map_err(|e| {
            TrustChainError::InvalidPayload(format!("canonical payload is not UTF-8: {}", e))
        })?;

        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            payload,
            prev_hash,
            hash,
            signature,
            signer_id,
            created_at,
        };

        sqlx::query(
            r#"
            INSERT INTO audit_events
                (id, event_type, payload, prev_hash, hash, signature, signer_id, created_at, idempotency_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(&canonical_text)
        .bind(&event.prev_hash)
        .bind(&event.hash)
        .bind(&event.signature)
        .bind(&event.signer_id)
        .bind(event.created_at)
        .bind(idempotency_key)
        .execute(&mut *conn)
        .await?;

        sqlx::query("UPDATE audit_chain_lock SET appends = appends + 1 WHERE id = 1")
            .execute(&mut *conn)
            .await?;

        if event.signature.is_none() {
            warn!("Audit event {} ({}) stored unsigned", event.id, event.event_type);
        }
        info!("Appended audit event: {}", event.summary());
        Ok(event)
    }

    /// Most recent event, if any.
    pub async fn head(&self) -> Result<Option<AuditEvent>, TrustChainError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events ORDER BY seq DESC LIMIT 1",
            EVENT_COLUMNS
        ))
        .fetch_optional(self.db.pool())
        .await?;
        row.map(|r| AuditEvent::from_row(&r)).transpose()
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<AuditEvent>, TrustChainError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE id = ?",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(|r| AuditEvent::from_row(&r)).transpose()
    }

    pub async fn count(&self) -> Result<i64, TrustChainError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM audit_events")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Events of one type, oldest first.
    pub async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<AuditEvent>, TrustChainError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE event_type = ? ORDER BY seq ASC",
            EVENT_COLUMNS
        ))
        .bind(event_type)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(AuditEvent::from_row).collect()
    }
}

/// Contiguous slice of the chain plus the hash it must link to.
#[derive(Debug, Clone)]
pub struct EventRange {
    /// Hash of the row just before the range; `None` when the range starts
    /// at genesis.
    pub anchor_hash: Option<String>,
    pub events: Vec<AuditEvent>,
}

/// Read events in append order, optionally after a given event id and
/// capped at `limit` rows.
pub async fn read_range(
    pool: &SqlitePool,
    start_after_id: Option<&str>,
    limit: Option<u32>,
) -> Result<EventRange, TrustChainError> {
    let (after_seq, anchor_hash) = match start_after_id {
        Some(id) => {
            let row = sqlx::query("SELECT seq, hash FROM audit_events WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| TrustChainError::NotFound(format!("audit event {}", id)))?;
            (row.try_get::<i64, _>("seq")?, Some(row.try_get::<String, _>("hash")?))
        }
        None => (0, None),
    };

    // SQLite treats a negative LIMIT as unbounded
    let limit = limit.map(i64::from).unwrap_or(-1);
    let rows = sqlx::query(&format!(
        "SELECT {} FROM audit_events WHERE seq > ? ORDER BY seq ASC LIMIT ?",
        EVENT_COLUMNS
    ))
    .bind(after_seq)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let events = rows
        .iter()
        .map(AuditEvent::from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EventRange {
        anchor_hash,
        events,
    })
}

async fn find_by_idempotency_key(
    conn: &mut SqliteConnection,
    key: &str,
) -> Result<Option<AuditEvent>, TrustChainError> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM audit_events WHERE idempotency_key = ?",
        EVENT_COLUMNS
    ))
    .bind(key)
    .fetch_optional(conn)
    .await?;
    row.map(|r| AuditEvent::from_row(&r)).transpose()
}

/// Wall-clock time, never earlier than the previous event.
fn monotonic_now(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}
