//! Configuration loader
//!
//! Layers built-in defaults, an optional TOML file and `TRUSTCHAIN__*`
//! environment variables, then validates the result.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use config::{Config, Environment, File};
use tracing::info;

use super::AppConfig;
use crate::error::TrustChainError;

const DEFAULT_CONFIG_FILE: &str = "trustchain";
const ENV_PREFIX: &str = "TRUSTCHAIN";

#[derive(Debug, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit file instead of `./trustchain.toml`.
    pub fn with_file(mut self, path: Option<&Path>) -> Self {
        self.path = path.map(Path::to_path_buf);
        self
    }

    pub fn load(self) -> Result<AppConfig, TrustChainError> {
        let defaults = AppConfig::default();

        let mut builder = Config::builder()
            .set_default("database_url", defaults.database_url.clone())?
            .set_default("environment", defaults.environment.as_str())?
            .set_default("require_strong_signer", defaults.require_strong_signer)?
            .set_default("server_host", defaults.server_host.clone())?
            .set_default("server_port", i64::from(defaults.server_port))?;

        builder = match &self.path {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                builder.add_source(File::from(path.as_path()).required(true))
            }
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            "Configuration loaded (environment={}, strict={})",
            config.environment.as_str(),
            config.strict()
        );
        Ok(config)
    }
}

/// Resolve secret material given as a file path, inline PEM or base64.
///
/// An existing file wins; a value containing `BEGIN` is taken verbatim;
/// otherwise base64 is attempted before falling back to the raw bytes.
pub fn read_value_or_file(value: &str) -> Result<Vec<u8>, TrustChainError> {
    if value.is_empty() {
        return Err(TrustChainError::ConfigError("value is empty".to_string()));
    }

    let path = Path::new(value);
    if path.is_file() {
        return std::fs::read(path).map_err(|e| {
            TrustChainError::ConfigError(format!("Failed to read {:?}: {}", path, e))
        });
    }

    if value.contains("BEGIN") {
        return Ok(value.as_bytes().to_vec());
    }

    match STANDARD.decode(value.trim()) {
        Ok(decoded) if !decoded.is_empty() => Ok(decoded),
        _ => Ok(value.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_value_or_file_prefers_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "from-file").unwrap();
        let value = read_value_or_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(value, b"from-file");
    }

    #[test]
    fn test_read_value_or_file_inline_pem_and_base64() {
        let pem = "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----";
        assert_eq!(read_value_or_file(pem).unwrap(), pem.as_bytes());

        assert_eq!(read_value_or_file("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(read_value_or_file("not base64!").unwrap(), b"not base64!");
        assert!(read_value_or_file("").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
database_url = "sqlite::memory:"
environment = "production"
server_port = 8088

[signing.proxy]
endpoint = "https://signer.internal"
bearer_token = "t0ken"

[multisig]
approval_binding = "proposal_id"
"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(Some(file.path()))
            .load()
            .unwrap();
        assert_eq!(config.server_port, 8088);
        assert!(config.strict());
        let proxy = config.signing.proxy.unwrap();
        assert_eq!(proxy.timeout_ms, super::super::DEFAULT_SIGNING_TIMEOUT_MS);
        assert_eq!(
            config.multisig.approval_binding,
            super::super::ApprovalBinding::ProposalId
        );
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[signing.local]
algorithm = "dsa"
key = "secret"
"#
        )
        .unwrap();

        let result = ConfigLoader::new().with_file(Some(file.path())).load();
        assert!(matches!(result, Err(TrustChainError::ConfigError(_))));
    }
}
