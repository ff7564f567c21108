//! Signing Backends
//!
//! One `sign`/`verify` interface over chain digests, implemented by a KMS
//! client, a remote signing proxy, a deterministic mock and a local key.
//! The backend is chosen once at startup by [`resolver::ResolvedSigner`]
//! and injected into the append path and the verifier.

pub mod http;
pub mod kms;
pub mod local;
pub mod mock;
pub mod proxy;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TrustChainError;

pub use kms::KmsBackend;
pub use local::LocalKeyBackend;
pub use mock::MockBackend;
pub use proxy::SigningProxyBackend;
pub use resolver::ResolvedSigner;

/// Signature algorithm families supported by the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    HmacSha256,
    RsaSha256,
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::HmacSha256 => "HMAC-SHA256",
            SignatureAlgorithm::RsaSha256 => "RSA-SHA256",
            SignatureAlgorithm::Ed25519 => "Ed25519",
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self, SignatureAlgorithm::HmacSha256)
    }
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = TrustChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "hmac" | "hmac-sha256" | "hs256" => Ok(SignatureAlgorithm::HmacSha256),
            "rsa" | "rsa-sha256" | "rs256" => Ok(SignatureAlgorithm::RsaSha256),
            "ed25519" | "eddsa" => Ok(SignatureAlgorithm::Ed25519),
            _ => Err(TrustChainError::ConfigError(format!(
                "Unknown signature algorithm: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend implementations, in resolution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Kms,
    Proxy,
    Mock,
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Kms => "kms",
            BackendKind::Proxy => "proxy",
            BackendKind::Mock => "mock",
            BackendKind::Local => "local",
        }
    }

    /// Only key material held behind an external boundary counts as strong.
    pub fn is_strong(&self) -> bool {
        matches!(self, BackendKind::Kms | BackendKind::Proxy)
    }
}

/// Result of signing one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDigest {
    pub kid: String,
    pub alg: String,
    pub signature_b64: String,
}

#[async_trait]
pub trait SigningBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Identifier of the key this backend signs with.
    fn kid(&self) -> &str;

    /// Whether a row stamped with `kid` was signed by the key behind this
    /// backend and can be checked with [`SigningBackend::verify`].
    fn owns_kid(&self, kid: &str) -> bool {
        kid == self.kid()
    }

    /// Sign a pre-computed chain digest. Implementations must not hash it again
    /// where the algorithm distinguishes digest from message signing.
    async fn sign(&self, digest: &[u8]) -> Result<SignedDigest, TrustChainError>;

    /// Verify a base64 signature over a chain digest.
    ///
    /// `Ok(false)` means the signature does not match; `Err` means the backend
    /// could not answer.
    async fn verify(&self, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError>;
}

pub(crate) fn decode_b64(value: &str) -> Result<Vec<u8>, TrustChainError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD
        .decode(value.trim())
        .map_err(|e| TrustChainError::CryptoError(format!("invalid base64: {}", e)))
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}
