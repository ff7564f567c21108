//! KMS signing backend
//!
//! Talks to a key-management service over JSON/HTTP. The service holds the
//! key material; this client only ever sends digests.
//!
//! | operation | path           | request                                             | response                |
//! |-----------|----------------|-----------------------------------------------------|-------------------------|
//! | sign      | `/sign`        | `keyId, message, messageType, signingAlgorithm`     | `keyId, signature`      |
//! | verify    | `/verify`      | `keyId, message, messageType, signature, signingAlgorithm` | `signatureValid` |
//! | mac       | `/generate-mac`| `keyId, message, macAlgorithm`                      | `keyId, mac`            |
//! | mac check | `/verify-mac`  | `keyId, message, mac, macAlgorithm`                 | `macValid`              |
//!
//! RSA requests use `messageType = DIGEST` so the service does not hash the
//! chain digest a second time. Ed25519 signs the digest bytes as the message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{build_http_client, post_json, TlsMaterial};
use super::{decode_b64, encode_b64, BackendKind, SignatureAlgorithm, SignedDigest, SigningBackend};
use crate::config::KmsConfig;
use crate::error::TrustChainError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    key_id: &'a str,
    message: String,
    message_type: &'static str,
    signing_algorithm: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    key_id: Option<String>,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    signature_valid: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MacRequest<'a> {
    key_id: &'a str,
    message: String,
    mac_algorithm: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mac: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MacResponse {
    key_id: Option<String>,
    mac: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MacVerifyResponse {
    mac_valid: bool,
}

pub struct KmsBackend {
    client: Client,
    endpoint: String,
    key_id: String,
    algorithm: SignatureAlgorithm,
    access_token: Option<String>,
}

impl KmsBackend {
    pub fn new(config: &KmsConfig) -> Result<Self, TrustChainError> {
        let algorithm = config.algorithm.parse()?;
        let client = build_http_client(
            &TlsMaterial::default(),
            Duration::from_millis(config.timeout_ms),
        )?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            algorithm,
            access_token: config.access_token.clone(),
        })
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn asymmetric_params(&self) -> (&'static str, &'static str) {
        match self.algorithm {
            SignatureAlgorithm::RsaSha256 => ("DIGEST", "RSASSA_PKCS1_V1_5_SHA_256"),
            _ => ("RAW", "ED25519"),
        }
    }
}

#[async_trait]
impl SigningBackend for KmsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kms
    }

    fn kid(&self) -> &str {
        &self.key_id
    }

    /// The configured key id, or a key ARN/alias path that ends in it.
    fn owns_kid(&self, kid: &str) -> bool {
        kid == self.key_id
            || kid
                .strip_suffix(self.key_id.as_str())
                .map_or(false, |prefix| prefix.ends_with('/') || prefix.ends_with(':'))
    }

    async fn sign(&self, digest: &[u8]) -> Result<SignedDigest, TrustChainError> {
        debug!("KMS sign ({}) with key {}", self.algorithm, self.key_id);

        let (kid, signature) = if self.algorithm.is_symmetric() {
            let request = MacRequest {
                key_id: &self.key_id,
                message: encode_b64(digest),
                mac_algorithm: "HMAC_SHA_256",
                mac: None,
            };
            let response: MacResponse = post_json(
                &self.client,
                &self.url("/generate-mac"),
                self.access_token.as_deref(),
                &request,
            )
            .await?;
            (response.key_id, response.mac)
        } else {
            let (message_type, signing_algorithm) = self.asymmetric_params();
            let request = SignRequest {
                key_id: &self.key_id,
                message: encode_b64(digest),
                message_type,
                signing_algorithm,
                signature: None,
            };
            let response: SignResponse = post_json(
                &self.client,
                &self.url("/sign"),
                self.access_token.as_deref(),
                &request,
            )
            .await?;
            (response.key_id, response.signature)
        };

        // reject anything that is not base64 before it reaches storage
        decode_b64(&signature).map_err(|_| {
            TrustChainError::SigningBackendUnavailable("KMS returned a non-base64 signature".to_string())
        })?;

        Ok(SignedDigest {
            kid: kid.unwrap_or_else(|| self.key_id.clone()),
            alg: self.algorithm.as_str().to_string(),
            signature_b64: signature,
        })
    }

    async fn verify(&self, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError> {
        if self.algorithm.is_symmetric() {
            let request = MacRequest {
                key_id: &self.key_id,
                message: encode_b64(digest),
                mac_algorithm: "HMAC_SHA_256",
                mac: Some(signature_b64),
            };
            let response: MacVerifyResponse = post_json(
                &self.client,
                &self.url("/verify-mac"),
                self.access_token.as_deref(),
                &request,
            )
            .await?;
            return Ok(response.mac_valid);
        }

        let (message_type, signing_algorithm) = self.asymmetric_params();
        let request = SignRequest {
            key_id: &self.key_id,
            message: encode_b64(digest),
            message_type,
            signing_algorithm,
            signature: Some(signature_b64),
        };
        let response: VerifyResponse = post_json(
            &self.client,
            &self.url("/verify"),
            self.access_token.as_deref(),
            &request,
        )
        .await?;
        Ok(response.signature_valid)
    }
}
