use thiserror::Error;

impl From<serde_json::Error> for TrustChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for TrustChainError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<sqlx::migrate::MigrateError> for TrustChainError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::DatabaseError(format!("Migration error: {}", err))
    }
}

impl From<config::ConfigError> for TrustChainError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for TrustChainError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TrustChainError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Signing backend unavailable: {0}")]
    SigningBackendUnavailable(String),

    #[error("Signing request rejected: {0}")]
    SigningRejected(String),

    #[error("Hash chain broken: {0}")]
    ChainBroken(String),

    #[error("Hash mismatch: {0}")]
    HashMismatch(String),

    #[error("Insufficient approvals: {0}")]
    InsufficientApprovals(String),

    #[error("Duplicate approval: {0}")]
    DuplicateApproval(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl TrustChainError {
    pub fn insufficient_approvals(found: usize, required: usize) -> Self {
        Self::InsufficientApprovals(format!(
            "found {} valid approvals, required {}",
            found, required
        ))
    }

    pub fn duplicate_approval(proposal_id: &str, signer_id: &str) -> Self {
        Self::DuplicateApproval(format!(
            "signer {} already approved proposal {}",
            signer_id, proposal_id
        ))
    }

    pub fn invalid_transition(proposal_id: &str, from: &str, to: &str) -> Self {
        Self::InvalidTransition(format!(
            "proposal {} cannot move from {} to {}",
            proposal_id, from, to
        ))
    }

    /// Stable machine-readable code for the error category.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "invalid_payload",
            Self::SignatureInvalid(_) => "signature_invalid",
            Self::SigningBackendUnavailable(_) => "signing_backend_unavailable",
            Self::SigningRejected(_) => "signing_rejected",
            Self::ChainBroken(_) => "chain_broken",
            Self::HashMismatch(_) => "hash_mismatch",
            Self::InsufficientApprovals(_) => "insufficient_approvals",
            Self::DuplicateApproval(_) => "duplicate_approval",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::ConfigError(_) => "config_error",
            Self::CryptoError(_) => "crypto_error",
            Self::DatabaseError(_) => "database_error",
            Self::IoError(_) => "io_error",
        }
    }

    /// Whether the caller can correct the condition and retry.
    ///
    /// Chain findings are never recoverable: they require operator
    /// investigation and are not repaired in place.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload(_)
                | Self::SignatureInvalid(_)
                | Self::SigningBackendUnavailable(_)
                | Self::SigningRejected(_)
                | Self::InsufficientApprovals(_)
                | Self::DuplicateApproval(_)
                | Self::Unauthorized(_)
                | Self::NotFound(_)
                | Self::InvalidTransition(_)
        )
    }
}
