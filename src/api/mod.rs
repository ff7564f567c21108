//! HTTP API
//!
//! axum router over the audit chain and the multisig engine.

pub mod handlers;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::audit::AuditLogger;
use crate::config::Environment;
use crate::error::TrustChainError;
use crate::multisig::{MultisigEngine, SignerRegistry};
use crate::signing::ResolvedSigner;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub environment: Environment,
    pub logger: AuditLogger,
    pub signer: ResolvedSigner,
    pub engine: MultisigEngine,
    pub registry: SignerRegistry,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
        .route(
            "/audit/events",
            get(handlers::list_events).post(handlers::append_event),
        )
        .route("/audit/events/:id", get(handlers::get_event))
        .route("/audit/verify", get(handlers::verify_chain))
        .route(
            "/signers",
            get(handlers::list_signers).post(handlers::register_signer),
        )
        .route("/signers/:id/revoke", post(handlers::revoke_signer))
        .route(
            "/proposals",
            get(handlers::list_proposals).post(handlers::create_proposal),
        )
        .route("/proposals/:id", get(handlers::get_proposal))
        .route("/proposals/:id/message", get(handlers::approval_message))
        .route("/proposals/:id/approvals", post(handlers::approve_proposal))
        .route("/proposals/:id/apply", post(handlers::apply_proposal))
        .route("/proposals/:id/reject", post(handlers::reject_proposal))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

/// Error response carrying the error category
pub struct ApiError(pub TrustChainError);

impl From<TrustChainError> for ApiError {
    fn from(err: TrustChainError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &TrustChainError) -> StatusCode {
    match err {
        TrustChainError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        TrustChainError::SignatureInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TrustChainError::Unauthorized(_) => StatusCode::FORBIDDEN,
        TrustChainError::NotFound(_) => StatusCode::NOT_FOUND,
        TrustChainError::DuplicateApproval(_)
        | TrustChainError::InvalidTransition(_)
        | TrustChainError::InsufficientApprovals(_)
        | TrustChainError::ChainBroken(_)
        | TrustChainError::HashMismatch(_) => StatusCode::CONFLICT,
        TrustChainError::SigningRejected(_) => StatusCode::BAD_GATEWAY,
        TrustChainError::SigningBackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        TrustChainError::ConfigError(_)
        | TrustChainError::CryptoError(_)
        | TrustChainError::DatabaseError(_)
        | TrustChainError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() || !self.0.is_recoverable() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request refused: {}", self.0);
        }
        let body = serde_json::json!({
            "status": "error",
            "error": self.0.category(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
