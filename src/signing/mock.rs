//! Deterministic HMAC-SHA256 backend for non-production environments.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{decode_b64, encode_b64, BackendKind, SignatureAlgorithm, SignedDigest, SigningBackend};
use crate::config::MockConfig;
use crate::error::TrustChainError;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_MOCK_KEY: &[u8] = b"trustchain-mock-signing-key";

pub struct MockBackend {
    key: Vec<u8>,
    kid: String,
}

impl MockBackend {
    pub fn new(key: impl Into<Vec<u8>>, kid: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kid: kid.into(),
        }
    }

    pub fn from_config(config: &MockConfig) -> Self {
        let key = config
            .key
            .as_deref()
            .map(|k| k.as_bytes().to_vec())
            .unwrap_or_else(|| DEFAULT_MOCK_KEY.to_vec());
        Self::new(key, config.kid.clone())
    }

    fn mac(&self) -> Result<HmacSha256, TrustChainError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| TrustChainError::CryptoError(format!("Invalid HMAC key: {}", e)))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_KEY, "mock-hmac")
    }
}

#[async_trait]
impl SigningBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn kid(&self) -> &str {
        &self.kid
    }

    async fn sign(&self, digest: &[u8]) -> Result<SignedDigest, TrustChainError> {
        let mut mac = self.mac()?;
        mac.update(digest);
        Ok(SignedDigest {
            kid: self.kid.clone(),
            alg: SignatureAlgorithm::HmacSha256.as_str().to_string(),
            signature_b64: encode_b64(&mac.finalize().into_bytes()),
        })
    }

    async fn verify(&self, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError> {
        let Ok(signature) = decode_b64(signature_b64) else {
            return Ok(false);
        };
        let mut mac = self.mac()?;
        mac.update(digest);
        Ok(mac.verify_slice(&signature).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let backend = MockBackend::default();
        let a = backend.sign(&[1u8; 32]).await.unwrap();
        let b = backend.sign(&[1u8; 32]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.alg, "HMAC-SHA256");

        let other = backend.sign(&[2u8; 32]).await.unwrap();
        assert_ne!(a.signature_b64, other.signature_b64);
    }

    #[tokio::test]
    async fn test_mock_verify_rejects_tampering() {
        let backend = MockBackend::new(b"k".to_vec(), "kid");
        let signed = backend.sign(b"digest").await.unwrap();
        assert!(backend.verify(&signed.signature_b64, b"digest").await.unwrap());
        assert!(!backend.verify(&signed.signature_b64, b"digesT").await.unwrap());

        let mut raw = decode_b64(&signed.signature_b64).unwrap();
        raw[0] ^= 0x01;
        assert!(!backend.verify(&encode_b64(&raw), b"digest").await.unwrap());
        assert!(!backend.verify("***", b"digest").await.unwrap());
    }
}
