//! Audit chain integration tests: linkage, fail-closed appends, concurrency.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use serde_json::json;
use trustchain::audit::{digest, AuditLogger, ChainAnchor, ChainVerifier};
use trustchain::canonical::canonicalize_json;
use trustchain::config::ProxyConfig;
use trustchain::error::TrustChainError;
use trustchain::signing::{ResolvedSigner, SigningProxyBackend};

#[tokio::test]
async fn test_chain_links_every_event() {
    let db = setup_test_db().await;
    let logger = mock_logger(&db);
    let events = append_events(&logger, 10).await;

    assert!(events[0].prev_hash.is_none());
    for pair in events.windows(2) {
        assert_eq!(pair[1].prev_hash.as_deref(), Some(pair[0].hash.as_str()));
        assert!(pair[1].created_at >= pair[0].created_at);
    }

    for event in &events {
        let canonical = canonicalize_json(&event.payload).unwrap();
        let expected = digest::digest(&canonical, event.prev_hash.as_deref()).unwrap();
        assert_eq!(event.hash, expected);
        assert!(event.signature.is_some());
        assert_eq!(event.signer_id.as_deref(), Some("mock-hmac"));
    }

    assert_eq!(logger.count().await.unwrap(), 10);
    assert_eq!(logger.head().await.unwrap().unwrap().id, events[9].id);
}

#[tokio::test]
async fn test_strict_append_with_unreachable_proxy_leaves_no_row() {
    let db = setup_test_db().await;
    let mock = mock_logger(&db);
    append_events(&mock, 2).await;

    let proxy = SigningProxyBackend::new(&ProxyConfig {
        endpoint: "http://127.0.0.1:9".to_string(),
        bearer_token: None,
        client_cert: None,
        client_key: None,
        ca_cert: None,
        timeout_ms: 200,
    })
    .unwrap();
    let strict = AuditLogger::new(db.clone(), ResolvedSigner::from_backend(Arc::new(proxy), true));

    let head_before = strict.head().await.unwrap().unwrap();
    let result = strict.append("agent.spawn", json!({"agent": "a-1"})).await;
    assert!(matches!(
        result,
        Err(TrustChainError::SigningBackendUnavailable(_))
    ));

    assert_eq!(strict.count().await.unwrap(), 2);
    assert_eq!(strict.head().await.unwrap().unwrap().hash, head_before.hash);
}

#[tokio::test]
async fn test_non_strict_append_with_unreachable_proxy_stores_unsigned() {
    let db = setup_test_db().await;
    let proxy = SigningProxyBackend::new(&ProxyConfig {
        endpoint: "http://127.0.0.1:9".to_string(),
        bearer_token: None,
        client_cert: None,
        client_key: None,
        ca_cert: None,
        timeout_ms: 200,
    })
    .unwrap();
    let logger = AuditLogger::new(db, ResolvedSigner::from_backend(Arc::new(proxy), false));

    let event = logger.append("agent.spawn", json!({"agent": "a-1"})).await.unwrap();
    assert!(event.signature.is_none());
    assert!(event.signer_id.is_none());
}

#[tokio::test]
async fn test_idempotent_retry_does_not_fork_chain() {
    let db = setup_test_db().await;
    let logger = mock_logger(&db);
    append_events(&logger, 1).await;

    let first = logger
        .append_idempotent("resource.allocate", json!({"cpu": 4}), "req-42")
        .await
        .unwrap();
    append_events(&logger, 1).await;
    let retry = logger
        .append_idempotent("resource.allocate", json!({"cpu": 4}), "req-42")
        .await
        .unwrap();

    assert_eq!(first.id, retry.id);
    assert_eq!(first.prev_hash, retry.prev_hash);
    assert_eq!(logger.count().await.unwrap(), 3);

    let conflicting = logger
        .append_idempotent("resource.allocate", json!({"cpu": 8}), "req-42")
        .await;
    assert!(matches!(conflicting, Err(TrustChainError::InvalidPayload(_))));
}

#[tokio::test]
async fn test_stored_events_cannot_be_edited() {
    let db = setup_test_db().await;
    let logger = mock_logger(&db);
    let events = append_events(&logger, 1).await;

    let update = sqlx::query("UPDATE audit_events SET payload = '{}' WHERE id = ?")
        .bind(&events[0].id)
        .execute(db.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM audit_events")
        .execute(db.pool())
        .await;
    assert!(delete.is_err());
    assert_eq!(logger.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_appends_form_a_single_chain() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_file_db(&dir).await;
    let logger = mock_logger(&db);

    let mut handles = Vec::new();
    for task in 0..4 {
        let logger = logger.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..5 {
                logger
                    .append("reasoning.trace", json!({"task": task, "step": i}))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let range = trustchain::audit::read_range(db.pool(), None, None).await.unwrap();
    assert_eq!(range.events.len(), 20);

    let prev_hashes: HashSet<Option<String>> =
        range.events.iter().map(|e| e.prev_hash.clone()).collect();
    assert_eq!(prev_hashes.len(), 20, "two events share a predecessor");

    let report = ChainVerifier::new(mock_signer(false))
        .verify_events(&range.events, ChainAnchor::Genesis)
        .await;
    assert!(report.is_valid(), "{}", report.summary());
    assert_eq!(report.verified, 20);
}
