pub mod loader;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::database::BUSY_TIMEOUT;
use crate::error::TrustChainError;
use crate::signing::proxy::worst_case_latency;
use crate::signing::SignatureAlgorithm;

pub use loader::{read_value_or_file, ConfigLoader};

pub const DEFAULT_SIGNING_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// What an approval signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalBinding {
    /// Canonical bytes of the proposal's identifying fields.
    Canonical,
    /// UTF-8 proposal id only. Kept for older signing clients.
    ProposalId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
    #[serde(default)]
    pub require_strong_signer: bool,
    pub server_host: String,
    pub server_port: u16,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub multisig: MultisigConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    pub kms: Option<KmsConfig>,
    pub proxy: Option<ProxyConfig>,
    pub mock: Option<MockConfig>,
    pub local: Option<LocalKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsConfig {
    pub endpoint: String,
    pub key_id: String,
    /// `hmac`, `rsa-sha256` or `ed25519`.
    pub algorithm: String,
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    /// PEM content, file path or base64.
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub ca_cert: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// HMAC key; a fixed test key is used when unset.
    pub key: Option<String>,
    #[serde(default = "default_mock_kid")]
    pub kid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalKeyConfig {
    /// `hmac`, `rsa-sha256` or `ed25519`.
    pub algorithm: String,
    /// Secret or private key: inline value, file path or base64.
    pub key: String,
    pub kid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigConfig {
    #[serde(default = "default_binding")]
    pub approval_binding: ApprovalBinding,
}

impl Default for MultisigConfig {
    fn default() -> Self {
        Self {
            approval_binding: default_binding(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SIGNING_TIMEOUT_MS
}

fn default_mock_kid() -> String {
    "mock-hmac".to_string()
}

fn default_binding() -> ApprovalBinding {
    ApprovalBinding::Canonical
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://trustchain.db".to_string(),
            environment: Environment::Development,
            require_strong_signer: false,
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            signing: SigningConfig::default(),
            multisig: MultisigConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from defaults, optional file and `TRUSTCHAIN__*` environment.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, TrustChainError> {
        ConfigLoader::new().with_file(path).load()
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Whether appends must fail closed without a strong signer.
    pub fn strict(&self) -> bool {
        self.is_production() || self.require_strong_signer
    }

    pub fn validate(&self) -> Result<(), TrustChainError> {
        if self.database_url.trim().is_empty() {
            return Err(TrustChainError::ConfigError(
                "database_url must not be empty".to_string(),
            ));
        }

        if let Some(kms) = &self.signing.kms {
            require_endpoint("signing.kms.endpoint", &kms.endpoint)?;
            if kms.key_id.trim().is_empty() {
                return Err(TrustChainError::ConfigError(
                    "signing.kms.key_id must not be empty".to_string(),
                ));
            }
            kms.algorithm.parse::<SignatureAlgorithm>()?;
            require_timeout("signing.kms.timeout_ms", kms.timeout_ms)?;
            require_within_write_lock(
                "signing.kms.timeout_ms",
                Duration::from_millis(kms.timeout_ms),
            )?;
        }

        if let Some(proxy) = &self.signing.proxy {
            require_endpoint("signing.proxy.endpoint", &proxy.endpoint)?;
            require_timeout("signing.proxy.timeout_ms", proxy.timeout_ms)?;
            require_within_write_lock(
                "signing.proxy.timeout_ms",
                worst_case_latency(Duration::from_millis(proxy.timeout_ms)),
            )?;
            if proxy.client_cert.is_some() != proxy.client_key.is_some() {
                return Err(TrustChainError::ConfigError(
                    "signing.proxy.client_cert and client_key must be set together".to_string(),
                ));
            }
        }

        if let Some(local) = &self.signing.local {
            local.algorithm.parse::<SignatureAlgorithm>()?;
            if local.key.trim().is_empty() {
                return Err(TrustChainError::ConfigError(
                    "signing.local.key must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn require_endpoint(field: &str, endpoint: &str) -> Result<(), TrustChainError> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(())
    } else {
        Err(TrustChainError::ConfigError(format!(
            "{} must be an http(s) URL, got {:?}",
            field, endpoint
        )))
    }
}

fn require_timeout(field: &str, timeout_ms: u64) -> Result<(), TrustChainError> {
    if timeout_ms == 0 {
        return Err(TrustChainError::ConfigError(format!("{} must be > 0", field)));
    }
    Ok(())
}

/// Appends sign while holding the SQLite write lock, so a slow signer must
/// give up well before queued writers hit the busy timeout.
fn require_within_write_lock(field: &str, worst_case: Duration) -> Result<(), TrustChainError> {
    let ceiling = BUSY_TIMEOUT / 2;
    if worst_case > ceiling {
        return Err(TrustChainError::ConfigError(format!(
            "{} allows signing to take {}ms, above the {}ms write-lock budget",
            field,
            worst_case.as_millis(),
            ceiling.as_millis()
        )));
    }
    Ok(())
}
