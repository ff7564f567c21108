//! Local key backend: HMAC, RSA or Ed25519 key from local configuration.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::{decode_b64, encode_b64, BackendKind, SignatureAlgorithm, SignedDigest, SigningBackend};
use crate::config::{read_value_or_file, LocalKeyConfig};
use crate::crypto::{PublicKeyMaterial, SecretKeyMaterial};
use crate::error::TrustChainError;

enum LocalKey {
    Hmac(Vec<u8>),
    Asymmetric {
        secret: SecretKeyMaterial,
        public: PublicKeyMaterial,
    },
}

pub struct LocalKeyBackend {
    key: LocalKey,
    algorithm: SignatureAlgorithm,
    kid: String,
}

impl LocalKeyBackend {
    pub fn hmac(secret: impl Into<Vec<u8>>, kid: Option<String>) -> Result<Self, TrustChainError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TrustChainError::ConfigError("HMAC key is empty".to_string()));
        }
        let kid = kid.unwrap_or_else(|| default_kid("hmac", &secret));
        Ok(Self {
            key: LocalKey::Hmac(secret),
            algorithm: SignatureAlgorithm::HmacSha256,
            kid,
        })
    }

    pub fn asymmetric(secret: SecretKeyMaterial, kid: Option<String>) -> Result<Self, TrustChainError> {
        let algorithm = secret.algorithm().ok_or_else(|| {
            TrustChainError::ConfigError(format!(
                "{} keys cannot sign audit events",
                secret.key_type()
            ))
        })?;
        let public = secret.public_key();
        let kid = match kid {
            Some(kid) => kid,
            None => default_kid(secret.key_type(), public.to_encoded()?.as_bytes()),
        };
        Ok(Self {
            key: LocalKey::Asymmetric { secret, public },
            algorithm,
            kid,
        })
    }

    pub fn from_config(config: &LocalKeyConfig) -> Result<Self, TrustChainError> {
        let algorithm: SignatureAlgorithm = config.algorithm.parse()?;
        let bytes = read_value_or_file(&config.key)?;

        if algorithm.is_symmetric() {
            return Self::hmac(bytes, config.kid.clone());
        }

        let secret = if algorithm == SignatureAlgorithm::Ed25519 && bytes.len() == 32 {
            SecretKeyMaterial::parse(&encode_b64(&bytes))?
        } else {
            let text = String::from_utf8(bytes).map_err(|_| {
                TrustChainError::ConfigError("signing.local.key is not a recognized key".to_string())
            })?;
            SecretKeyMaterial::parse(&text)?
        };

        if secret.algorithm() != Some(algorithm) {
            return Err(TrustChainError::ConfigError(format!(
                "signing.local.algorithm is {} but the key is {}",
                algorithm,
                secret.key_type()
            )));
        }

        Self::asymmetric(secret, config.kid.clone())
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Public half of an asymmetric key, for publishing to verifiers.
    pub fn public_key(&self) -> Option<&PublicKeyMaterial> {
        match &self.key {
            LocalKey::Asymmetric { public, .. } => Some(public),
            LocalKey::Hmac(_) => None,
        }
    }
}

/// `local-<type>:` followed by the first four bytes of SHA-256 over the
/// public material.
fn default_kid(key_type: &str, material: &[u8]) -> String {
    let sum = Sha256::digest(material);
    format!("local-{}:{}", key_type, hex::encode(&sum[..4]))
}

#[async_trait]
impl SigningBackend for LocalKeyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn kid(&self) -> &str {
        &self.kid
    }

    async fn sign(&self, digest: &[u8]) -> Result<SignedDigest, TrustChainError> {
        let signature = match &self.key {
            LocalKey::Hmac(secret) => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                    .map_err(|e| TrustChainError::CryptoError(format!("Invalid HMAC key: {}", e)))?;
                mac.update(digest);
                mac.finalize().into_bytes().to_vec()
            }
            LocalKey::Asymmetric { secret, .. } => secret.sign_digest(digest)?,
        };

        Ok(SignedDigest {
            kid: self.kid.clone(),
            alg: self.algorithm.as_str().to_string(),
            signature_b64: encode_b64(&signature),
        })
    }

    async fn verify(&self, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError> {
        let Ok(signature) = decode_b64(signature_b64) else {
            warn!("Local verify received non-base64 signature");
            return Ok(false);
        };

        match &self.key {
            LocalKey::Hmac(secret) => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                    .map_err(|e| TrustChainError::CryptoError(format!("Invalid HMAC key: {}", e)))?;
                mac.update(digest);
                Ok(mac.verify_slice(&signature).is_ok())
            }
            LocalKey::Asymmetric { public, .. } => public.verify_digest(digest, &signature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip_bit(signature_b64: &str, byte: usize) -> String {
        let mut raw = decode_b64(signature_b64).unwrap();
        raw[byte] ^= 0x01;
        encode_b64(&raw)
    }

    async fn assert_round_trip(backend: &LocalKeyBackend) {
        let digest = [0x5au8; 32];
        let signed = backend.sign(&digest).await.unwrap();
        assert_eq!(signed.kid, backend.kid());
        assert!(backend.verify(&signed.signature_b64, &digest).await.unwrap());

        let len = decode_b64(&signed.signature_b64).unwrap().len();
        for byte in [0, len / 2, len - 1] {
            let flipped = flip_bit(&signed.signature_b64, byte);
            assert!(
                !backend.verify(&flipped, &digest).await.unwrap(),
                "{} accepted a signature flipped at byte {}",
                backend.algorithm(),
                byte
            );
        }
        assert!(!backend.verify("not base64!", &digest).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_hmac_roundtrip() {
        let backend = LocalKeyBackend::hmac(b"local-secret".to_vec(), None).unwrap();
        assert!(backend.kid().starts_with("local-hmac:"));

        let signed = backend.sign(&[9u8; 32]).await.unwrap();
        assert!(backend.verify(&signed.signature_b64, &[9u8; 32]).await.unwrap());
        assert!(!backend.verify(&signed.signature_b64, &[8u8; 32]).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_ed25519_from_base64_seed() {
        let config = LocalKeyConfig {
            algorithm: "ed25519".to_string(),
            key: encode_b64(&[3u8; 32]),
            kid: Some("ops-key".to_string()),
        };
        let backend = LocalKeyBackend::from_config(&config).unwrap();
        assert_eq!(backend.kid(), "ops-key");
        assert!(backend.public_key().is_some());

        let signed = backend.sign(&[1u8; 32]).await.unwrap();
        assert_eq!(signed.alg, "Ed25519");
        assert!(backend.verify(&signed.signature_b64, &[1u8; 32]).await.unwrap());
    }

    #[test]
    fn test_algorithm_key_mismatch_is_config_error() {
        let pem = SecretKeyMaterial::generate_ed25519().to_encoded().unwrap();
        let config = LocalKeyConfig {
            algorithm: "rsa-sha256".to_string(),
            key: pem,
            kid: None,
        };
        assert!(matches!(
            LocalKeyBackend::from_config(&config),
            Err(TrustChainError::ConfigError(_))
        ));
    }

    #[test]
    fn test_secp256k1_cannot_back_audit_signing() {
        let secret = SecretKeyMaterial::parse(
            "0101010101010101010101010101010101010101010101010101010101010101",
        )
        .unwrap();
        assert!(LocalKeyBackend::asymmetric(secret, None).is_err());
    }

    #[tokio::test]
    async fn test_hmac_rejects_flipped_signature() {
        let backend = LocalKeyBackend::hmac(b"local-secret".to_vec(), None).unwrap();
        assert_round_trip(&backend).await;
    }

    #[tokio::test]
    async fn test_ed25519_rejects_flipped_signature() {
        let backend =
            LocalKeyBackend::asymmetric(SecretKeyMaterial::generate_ed25519(), None).unwrap();
        assert_eq!(backend.algorithm(), SignatureAlgorithm::Ed25519);
        assert_round_trip(&backend).await;
    }

    #[tokio::test]
    async fn test_rsa_rejects_flipped_signature() {
        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let pem = SecretKeyMaterial::Rsa(Box::new(key)).to_encoded().unwrap();
        let config = LocalKeyConfig {
            algorithm: "rsa-sha256".to_string(),
            key: pem,
            kid: Some("rsa-ops".to_string()),
        };
        let backend = LocalKeyBackend::from_config(&config).unwrap();
        assert_eq!(backend.algorithm(), SignatureAlgorithm::RsaSha256);
        assert_eq!(backend.kid(), "rsa-ops");
        assert_round_trip(&backend).await;

        // PKCS#1 v1.5 over the digest itself, checkable with the public key alone
        let digest = [0x5au8; 32];
        let signed = backend.sign(&digest).await.unwrap();
        let public = backend.public_key().unwrap();
        assert!(public
            .verify_digest(&digest, &decode_b64(&signed.signature_b64).unwrap())
            .unwrap());
    }
}
