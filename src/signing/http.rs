//! HTTP plumbing shared by the KMS and signing-proxy backends.

use std::time::Duration;

use reqwest::{Certificate, Client, Identity, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::read_value_or_file;
use crate::error::TrustChainError;

/// TLS material for a signer endpoint. Each value is inline PEM, a file
/// path or base64.
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub ca_cert: Option<String>,
}

/// Build a client with a request timeout and optional mutual TLS.
pub fn build_http_client(tls: &TlsMaterial, timeout: Duration) -> Result<Client, TrustChainError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .use_rustls_tls();

    match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = read_value_or_file(cert)?;
            pem.push(b'\n');
            pem.extend(read_value_or_file(key)?);
            let identity = Identity::from_pem(&pem).map_err(|e| {
                TrustChainError::ConfigError(format!("Failed to load client certificate/key: {}", e))
            })?;
            builder = builder.identity(identity);
        }
        (None, None) => {
            debug!("mTLS client cert/key not provided; proceeding without client auth");
        }
        _ => {
            return Err(TrustChainError::ConfigError(
                "client certificate and key must be provided together".to_string(),
            ));
        }
    }

    if let Some(ca) = &tls.ca_cert {
        let ca = Certificate::from_pem(&read_value_or_file(ca)?)
            .map_err(|e| TrustChainError::ConfigError(format!("Failed to parse CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(ca);
    }

    builder
        .build()
        .map_err(|e| TrustChainError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

/// POST a JSON body and decode a JSON response.
///
/// Transport failures, timeouts and 5xx map to `SigningBackendUnavailable`;
/// any other non-success status is the signer refusing the request.
pub async fn post_json<B, R>(
    client: &Client,
    url: &str,
    bearer_token: Option<&str>,
    body: &B,
) -> Result<R, TrustChainError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| classify_transport(url, e))?;
    let status = response.status();

    if status.is_server_error() {
        let text = response.text().await.unwrap_or_default();
        return Err(TrustChainError::SigningBackendUnavailable(format!(
            "{} returned http {}: {}",
            url,
            status.as_u16(),
            truncate(&text)
        )));
    }

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(rejected(url, status, &text));
    }

    response.json::<R>().await.map_err(|e| {
        TrustChainError::SigningBackendUnavailable(format!("{} returned malformed body: {}", url, e))
    })
}

/// POST with a single retry after `backoff` on transient failures.
pub async fn post_json_with_retry<B, R>(
    client: &Client,
    url: &str,
    bearer_token: Option<&str>,
    body: &B,
    backoff: Duration,
) -> Result<R, TrustChainError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    match post_json(client, url, bearer_token, body).await {
        Err(TrustChainError::SigningBackendUnavailable(reason)) => {
            warn!("Signer request to {} failed ({}); retrying once", url, reason);
            tokio::time::sleep(backoff).await;
            post_json(client, url, bearer_token, body).await
        }
        other => other,
    }
}

fn classify_transport(url: &str, err: reqwest::Error) -> TrustChainError {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    TrustChainError::SigningBackendUnavailable(format!("{} {}: {}", url, kind, err))
}

fn rejected(url: &str, status: StatusCode, body: &str) -> TrustChainError {
    TrustChainError::SigningRejected(format!(
        "{} returned http {}: {}",
        url,
        status.as_u16(),
        truncate(body)
    ))
}

fn truncate(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(2048)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}
