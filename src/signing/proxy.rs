//! Remote signing-proxy backend
//!
//! Delegates to a central signer behind an HSM boundary:
//! `POST /sign/hash {digest_hex}` and `POST /verify {digest_hex, signature}`.
//! Supports bearer tokens and mutual TLS. Transient failures are retried
//! once; refusals are not.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{build_http_client, post_json_with_retry, TlsMaterial};
use super::{decode_b64, BackendKind, SignedDigest, SigningBackend};
use crate::config::ProxyConfig;
use crate::error::TrustChainError;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Longest a proxy call can take: two attempts and the backoff between them.
pub(crate) fn worst_case_latency(timeout: Duration) -> Duration {
    timeout * 2 + RETRY_BACKOFF
}

#[derive(Debug, Serialize)]
struct SignHashRequest {
    digest_hex: String,
}

#[derive(Debug, Deserialize)]
struct SignHashResponse {
    kid: String,
    alg: String,
    signature: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    digest_hex: String,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    valid: bool,
}

pub struct SigningProxyBackend {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
    // Signatures carry the kid the proxy reports; this one names the endpoint
    kid: String,
}

impl SigningProxyBackend {
    pub fn new(config: &ProxyConfig) -> Result<Self, TrustChainError> {
        let tls = TlsMaterial {
            client_cert: config.client_cert.clone(),
            client_key: config.client_key.clone(),
            ca_cert: config.ca_cert.clone(),
        };
        let client = build_http_client(&tls, Duration::from_millis(config.timeout_ms))?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            kid: format!("proxy:{}", endpoint),
            endpoint,
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl SigningBackend for SigningProxyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Proxy
    }

    fn kid(&self) -> &str {
        &self.kid
    }

    // The proxy names its own keys and answers /verify for all of them
    fn owns_kid(&self, _kid: &str) -> bool {
        true
    }

    async fn sign(&self, digest: &[u8]) -> Result<SignedDigest, TrustChainError> {
        let url = format!("{}/sign/hash", self.endpoint);
        let request = SignHashRequest {
            digest_hex: hex::encode(digest),
        };
        debug!("Signing proxy request for digest {}", request.digest_hex);

        let response: SignHashResponse = post_json_with_retry(
            &self.client,
            &url,
            self.bearer_token.as_deref(),
            &request,
            RETRY_BACKOFF,
        )
        .await?;

        if response.signature.is_empty() || response.kid.is_empty() {
            return Err(TrustChainError::SigningBackendUnavailable(
                "signing proxy response missing signature or kid".to_string(),
            ));
        }
        decode_b64(&response.signature).map_err(|_| {
            TrustChainError::SigningBackendUnavailable(
                "signing proxy returned a non-base64 signature".to_string(),
            )
        })?;

        Ok(SignedDigest {
            kid: response.kid,
            alg: response.alg,
            signature_b64: response.signature,
        })
    }

    async fn verify(&self, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError> {
        let url = format!("{}/verify", self.endpoint);
        let request = VerifyRequest {
            digest_hex: hex::encode(digest),
            signature: signature_b64,
        };

        let response: VerifyResponse = post_json_with_retry(
            &self.client,
            &url,
            self.bearer_token.as_deref(),
            &request,
            RETRY_BACKOFF,
        )
        .await?;
        Ok(response.valid)
    }
}
