//! Backend resolution and the fail-closed append policy.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{
    BackendKind, KmsBackend, LocalKeyBackend, MockBackend, SignedDigest, SigningBackend,
    SigningProxyBackend,
};
use crate::config::AppConfig;
use crate::error::TrustChainError;

/// The signing backend chosen at startup, together with the strictness
/// policy that governs what the append path may do when signing fails.
#[derive(Clone)]
pub struct ResolvedSigner {
    backend: Option<Arc<dyn SigningBackend>>,
    strict: bool,
}

impl std::fmt::Debug for ResolvedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSigner")
            .field("backend", &self.kind())
            .field("strict", &self.strict)
            .finish()
    }
}

impl ResolvedSigner {
    /// Pick the first configured backend in the order kms, proxy, mock, local.
    ///
    /// A configured backend that cannot be constructed is skipped. The mock
    /// backend is never used in production.
    pub fn resolve(config: &AppConfig) -> Result<Self, TrustChainError> {
        let strict = config.strict();
        let signing = &config.signing;

        let mut candidates: Vec<(BackendKind, Result<Arc<dyn SigningBackend>, TrustChainError>)> =
            Vec::new();

        if let Some(kms) = &signing.kms {
            candidates.push((
                BackendKind::Kms,
                KmsBackend::new(kms).map(|b| Arc::new(b) as Arc<dyn SigningBackend>),
            ));
        }
        if let Some(proxy) = &signing.proxy {
            candidates.push((
                BackendKind::Proxy,
                SigningProxyBackend::new(proxy).map(|b| Arc::new(b) as Arc<dyn SigningBackend>),
            ));
        }
        if let Some(mock) = &signing.mock {
            if config.is_production() {
                warn!("Mock signing backend configured in production; ignoring it");
            } else {
                candidates.push((
                    BackendKind::Mock,
                    Ok(Arc::new(MockBackend::from_config(mock)) as Arc<dyn SigningBackend>),
                ));
            }
        }
        if let Some(local) = &signing.local {
            candidates.push((
                BackendKind::Local,
                LocalKeyBackend::from_config(local).map(|b| Arc::new(b) as Arc<dyn SigningBackend>),
            ));
        }

        for (kind, candidate) in candidates {
            match candidate {
                Ok(backend) => {
                    let resolved = Self::from_backend(backend, strict);
                    resolved.log_resolution();
                    return Ok(resolved);
                }
                Err(e) => {
                    error!("Signing backend {} failed to initialise: {}", kind.as_str(), e);
                }
            }
        }

        let resolved = Self::unsigned(strict);
        resolved.log_resolution();
        Ok(resolved)
    }

    pub fn from_backend(backend: Arc<dyn SigningBackend>, strict: bool) -> Self {
        Self {
            backend: Some(backend),
            strict,
        }
    }

    /// No backend at all. Appends are unsigned, or refused when strict.
    pub fn unsigned(strict: bool) -> Self {
        Self {
            backend: None,
            strict,
        }
    }

    pub fn kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn kid(&self) -> Option<&str> {
        self.backend.as_ref().map(|b| b.kid())
    }

    pub fn backend(&self) -> Option<&Arc<dyn SigningBackend>> {
        self.backend.as_ref()
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_strong(&self) -> bool {
        self.kind().map_or(false, |k| k.is_strong())
    }

    /// Whether appends can currently succeed with a signature the policy accepts.
    pub fn can_sign_strictly(&self) -> bool {
        !self.strict || self.is_strong()
    }

    fn log_resolution(&self) {
        match self.kind() {
            Some(kind) => info!(
                "Signing backend resolved: {} (kid={}, strict={})",
                kind.as_str(),
                self.kid().unwrap_or_default(),
                self.strict
            ),
            None => warn!("No signing backend configured (strict={})", self.strict),
        }
        if !self.can_sign_strictly() {
            error!("Strict mode requires a kms or proxy signer; appends will be refused");
        }
    }

    /// Sign a chain digest on behalf of the append path.
    ///
    /// Returns `Ok(None)` when the event may be stored unsigned. In strict
    /// mode every shortfall is an error, so the caller's transaction aborts.
    pub async fn sign_for_append(&self, digest: &[u8]) -> Result<Option<SignedDigest>, TrustChainError> {
        let Some(backend) = &self.backend else {
            if self.strict {
                return Err(TrustChainError::SigningBackendUnavailable(
                    "no signing backend configured".to_string(),
                ));
            }
            warn!("No signing backend; storing event unsigned");
            return Ok(None);
        };

        if self.strict && !backend.kind().is_strong() {
            return Err(TrustChainError::SigningBackendUnavailable(format!(
                "{} backend is not permitted in strict mode",
                backend.kind().as_str()
            )));
        }

        match backend.sign(digest).await {
            Ok(signed) => Ok(Some(signed)),
            Err(e) if self.strict => {
                error!("Signing failed in strict mode: {}", e);
                Err(e)
            }
            Err(e) => {
                warn!("Signing failed ({}); storing event unsigned", e);
                Ok(None)
            }
        }
    }

    pub fn owns_kid(&self, kid: &str) -> bool {
        self.backend.as_ref().map_or(false, |b| b.owns_kid(kid))
    }

    /// Verify with the same backend the append path signs with.
    pub async fn verify(&self, signature_b64: &str, digest: &[u8]) -> Result<bool, TrustChainError> {
        match &self.backend {
            Some(backend) => backend.verify(signature_b64, digest).await,
            None => Err(TrustChainError::SigningBackendUnavailable(
                "no signing backend configured for verification".to_string(),
            )),
        }
    }
}
