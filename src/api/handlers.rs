use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, AppState};
use crate::audit::{read_range, ChainVerifier, VerifyOptions};
use crate::error::TrustChainError;
use crate::multisig::{NewProposal, ProposalStatus, SignerRole};
use crate::signing::encode_b64;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

type ApiResult = Result<Json<Value>, ApiError>;

fn success(data: impl serde::Serialize) -> ApiResult {
    let data = serde_json::to_value(data).map_err(TrustChainError::from)?;
    Ok(Json(json!({ "status": "success", "data": data })))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "trustchain",
        "timestamp": chrono::Utc::now()
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let mut status = json!({
        "status": "healthy",
        "service": "trustchain",
        "timestamp": chrono::Utc::now(),
        "environment": state.environment.as_str(),
        "signer": {
            "backend": state.signer.kind().map(|k| k.as_str()),
            "kid": state.signer.kid(),
            "strict": state.signer.is_strict(),
            "strong": state.signer.is_strong(),
        }
    });

    match state.logger.database().health_check().await {
        Ok(()) => {
            let count = state.logger.count().await.ok();
            let head = state.logger.head().await.ok().flatten().map(|h| h.hash);
            status["database"] = json!({ "status": "healthy" });
            status["chain"] = json!({ "events": count, "headHash": head });
        }
        Err(_) => {
            status["status"] = json!("degraded");
            status["database"] = json!({ "status": "error" });
        }
    }

    if state.signer.is_strict() && !state.signer.can_sign_strictly() {
        status["status"] = json!("degraded");
    }

    Json(status)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub event_type: String,
    pub payload: Value,
    pub idempotency_key: Option<String>,
}

pub async fn append_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AppendRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let event = match header_key.or(request.idempotency_key) {
        Some(key) => {
            state
                .logger
                .append_idempotent(&request.event_type, request.payload, &key)
                .await?
        }
        None => state.logger.append(&request.event_type, request.payload).await?,
    };

    let Json(body) = success(&event)?;
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start_after: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<u32>,
    pub allow_unsigned: Option<bool>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult {
    if let Some(event_type) = &query.event_type {
        let events = state.logger.get_events_by_type(event_type).await?;
        return success(json!({
            "anchorHash": null,
            "events": events,
        }));
    }

    let range = read_range(
        state.logger.database().pool(),
        query.start_after.as_deref(),
        query.limit,
    )
    .await?;
    success(json!({
        "anchorHash": range.anchor_hash,
        "events": range.events,
    }))
}

pub async fn get_event(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.logger.get_event(&id).await? {
        Some(event) => success(event),
        None => Err(TrustChainError::NotFound(format!("audit event {}", id)).into()),
    }
}

pub async fn verify_chain(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult {
    let pool = state.logger.database().pool();
    let verifier = ChainVerifier::new(state.signer.clone())
        .with_options(VerifyOptions {
            allow_unsigned: query.allow_unsigned.unwrap_or(false),
        })
        .with_registry_keys(pool)
        .await?;
    let report = verifier
        .verify_live(
            pool,
            query.start_after.as_deref(),
            query.limit,
        )
        .await?;

    info!("Verification via API: {}", report.summary());
    success(json!({
        "valid": report.is_valid(),
        "summary": report.summary(),
        "report": report,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSignerRequest {
    pub signer_id: String,
    pub public_key: String,
    pub role: Option<SignerRole>,
    pub comment: Option<String>,
}

pub async fn register_signer(
    State(state): State<AppState>,
    Json(request): Json<RegisterSignerRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = state
        .registry
        .register(
            &request.signer_id,
            &request.public_key,
            request.role.unwrap_or(SignerRole::Signer),
            request.comment.as_deref(),
        )
        .await?;
    let Json(body) = success(record)?;
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    pub reason: Option<String>,
}

pub async fn revoke_signer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RevokeRequest>,
) -> ApiResult {
    let record = state.registry.revoke(&id, request.reason.as_deref()).await?;
    success(record)
}

#[derive(Debug, Deserialize)]
pub struct ListSignersQuery {
    pub include_revoked: Option<bool>,
}

pub async fn list_signers(
    State(state): State<AppState>,
    Query(query): Query<ListSignersQuery>,
) -> ApiResult {
    let signers = state
        .registry
        .list(query.include_revoked.unwrap_or(false))
        .await?;
    success(signers)
}

pub async fn create_proposal(
    State(state): State<AppState>,
    Json(request): Json<NewProposal>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let proposal = state.engine.create_proposal(request).await?;
    let Json(body) = success(proposal)?;
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct ListProposalsQuery {
    pub status: Option<String>,
}

pub async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<ListProposalsQuery>,
) -> ApiResult {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ProposalStatus>)
        .transpose()?;
    let proposals = state.engine.list_proposals(status).await?;
    success(proposals)
}

pub async fn get_proposal(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let proposal = state
        .engine
        .get_proposal(&id)
        .await?
        .ok_or_else(|| TrustChainError::NotFound(format!("proposal {}", id)))?;
    let approvals = state.engine.list_approvals(&id).await?;
    let valid = state.engine.valid_approval_count(&id).await?;
    success(json!({
        "proposal": proposal,
        "approvals": approvals,
        "validApprovals": valid,
    }))
}

pub async fn approval_message(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let message = state.engine.approval_message(&id).await?;
    success(json!({
        "proposalId": id,
        "binding": state.engine.binding(),
        "messageB64": encode_b64(&message),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub signer_id: String,
    pub signature: String,
}

pub async fn approve_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult {
    let outcome = state
        .engine
        .approve(&id, &request.signer_id, &request.signature)
        .await?;
    success(outcome)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRequest {
    pub actor_id: String,
    pub reason: Option<String>,
}

pub async fn apply_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> ApiResult {
    let proposal = state.engine.apply(&id, &request.actor_id).await?;
    success(proposal)
}

pub async fn reject_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> ApiResult {
    let proposal = state
        .engine
        .reject(&id, &request.actor_id, request.reason.as_deref())
        .await?;
    success(proposal)
}
