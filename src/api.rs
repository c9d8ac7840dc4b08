//! Dispute API Endpoints
//!
//! REST surface over [`DisputeEngine`]. Every mutating request names the
//! acting user in the `x-acted-by` header. Failures come back as an
//! [`ErrorBody`] with a status chosen by [`ErrorKind`].

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use uuid::Uuid;

use crate::case::{Case, NewCase};
use crate::claim::{ClaimResponse, KianSubmission};
use crate::engine::{
    ApprovalRefund, CaseView, DisputeEngine, OpenRefund, PhaseStep, RecordOutcome,
};
use crate::error::{CommandFailure, EngineError, ErrorKind};
use crate::history::HistoryEntry;
use crate::loss::ClaimEligibility;
use crate::records::StagePayload;
use crate::refund::{RefundMethod, RefundView};
use crate::router::ManualChoice;
use crate::stage::Stage;

pub const ACTOR_HEADER: &str = "x-acted-by";

/// Error payload returned by every failing endpoint
pub type ErrorBody = CommandFailure;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
        ErrorKind::StageMismatch | ErrorKind::DuplicateConstraintViolation => {
            StatusCode::CONFLICT
        }
        ErrorKind::PreconditionNotMet => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body: ErrorBody = self.0.to_failure();
        if body.kind == ErrorKind::Fatal {
            tracing::error!(error = %self.0, "request failed");
        }
        (status_for(body.kind), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// JSON body whose rejections are reported as validation failures
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(EngineError::field("body", rejection.body_text()).into()),
        }
    }
}

/// Optional JSON body. Only an empty body is `None`; a body that is present
/// must be JSON and must parse.
pub struct OptionalApiJson<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("application/json"));
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| EngineError::field("body", rejection.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalApiJson(None));
        }
        if !is_json {
            return Err(EngineError::field(
                "body",
                "expected request with `Content-Type: application/json`",
            )
            .into());
        }
        match Json::<T>::from_bytes(&bytes) {
            Ok(Json(value)) => Ok(OptionalApiJson(Some(value))),
            Err(rejection) => Err(EngineError::field("body", rejection.body_text()).into()),
        }
    }
}

fn actor(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            EngineError::field("acted_by", format!("the {} header is required", ACTOR_HEADER))
                .into()
        })
}

fn stage_param(stage_id: u8) -> Result<Stage, ApiError> {
    Stage::from_id(stage_id)
        .ok_or_else(|| EngineError::field("stage", format!("unknown stage {}", stage_id)).into())
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitStageRequest {
    pub payload: StagePayload,
    /// Create directly as submitted
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReviseRequest {
    pub payload: StagePayload,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRefundBody {
    pub amount: Decimal,
    #[serde(default = "default_method")]
    pub method: RefundMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_method() -> RefundMethod {
    RefundMethod::BankTransfer
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub refund: Option<ApproveRefundBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceRequest {
    /// "refund" or "appeal"
    pub choice: String,
}

#[derive(Debug, Deserialize)]
pub struct DisputedAmountRequest {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct NextActionRequest {
    pub next_action: Option<String>,
    #[serde(default)]
    pub due: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RefundQuery {
    pub origin: Option<u8>,
}

// =============================================================================
// ROUTER
// =============================================================================

pub fn dispute_router(engine: DisputeEngine) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/cases", post(open_case))
        .route("/api/cases/:case_id", get(get_case))
        .route("/api/cases/:case_id/history", get(history))
        .route("/api/cases/:case_id/disputed-amount", put(set_disputed_amount))
        .route("/api/cases/:case_id/next-action", put(set_next_action))
        .route("/api/cases/:case_id/records", post(submit_stage))
        .route("/api/cases/:case_id/records/:stage", put(revise_record))
        .route("/api/cases/:case_id/records/:stage/submit", post(submit_record))
        .route("/api/cases/:case_id/records/:stage/approve", post(approve_record))
        .route("/api/cases/:case_id/records/:stage/reject", post(reject_record))
        .route("/api/cases/:case_id/choice", post(choose_next_stage))
        .route("/api/cases/:case_id/withdraw", post(withdraw_case))
        .route(
            "/api/cases/:case_id/refunds",
            get(list_refunds).post(open_refund),
        )
        .route(
            "/api/cases/:case_id/refunds/:refund_id",
            axum::routing::delete(delete_refund),
        )
        .route(
            "/api/cases/:case_id/refunds/:refund_id/phase",
            post(advance_refund_phase),
        )
        .route(
            "/api/cases/:case_id/refunds/:refund_id/cancel-transfer",
            post(cancel_transfer),
        )
        .route("/api/cases/:case_id/claims", get(claim_status))
        .route("/api/cases/:case_id/claims/:stage", post(create_claim))
        .route("/api/cases/:case_id/claims/:stage/submit", post(submit_claim))
        .route(
            "/api/cases/:case_id/claims/:stage/response",
            post(record_claim_response),
        )
        .route("/api/cases/:case_id/claims/:stage/close", post(close_claim))
        .with_state(engine)
}

// =============================================================================
// CASES
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "tax-dispute-engine" }))
}

async fn open_case(
    State(engine): State<DisputeEngine>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<NewCase>,
) -> Result<(StatusCode, Json<Case>), ApiError> {
    let case = engine.open_case(body, &actor(&headers)?).await?;
    Ok((StatusCode::CREATED, Json(case)))
}

async fn get_case(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
) -> ApiResult<CaseView> {
    Ok(Json(engine.get_case(case_id).await?))
}

async fn history(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
) -> ApiResult<Vec<HistoryEntry>> {
    Ok(Json(engine.history(case_id).await?))
}

async fn set_disputed_amount(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<DisputedAmountRequest>,
) -> ApiResult<Case> {
    let case = engine
        .set_disputed_amount(case_id, body.amount, &actor(&headers)?)
        .await?;
    Ok(Json(case))
}

async fn set_next_action(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<NextActionRequest>,
) -> ApiResult<Case> {
    let case = engine
        .set_next_action(case_id, body.next_action, body.due, &actor(&headers)?)
        .await?;
    Ok(Json(case))
}

async fn choose_next_stage(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<ChoiceRequest>,
) -> ApiResult<RecordOutcome> {
    let choice: ManualChoice = body
        .choice
        .parse()
        .map_err(|e: String| ApiError::from(EngineError::field("choice", e)))?;
    let outcome = engine
        .choose_next_stage(case_id, choice, &actor(&headers)?)
        .await?;
    Ok(Json(outcome))
}

async fn withdraw_case(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    headers: HeaderMap,
    OptionalApiJson(body): OptionalApiJson<ReasonRequest>,
) -> ApiResult<Case> {
    let reason = body.and_then(|b| b.reason);
    let case = engine
        .withdraw_case(case_id, reason, &actor(&headers)?)
        .await?;
    Ok(Json(case))
}

// =============================================================================
// STAGE RECORDS
// =============================================================================

async fn submit_stage(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<SubmitStageRequest>,
) -> Result<(StatusCode, Json<RecordOutcome>), ApiError> {
    let outcome = engine
        .submit_stage(case_id, body.payload, body.submit, &actor(&headers)?)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn revise_record(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<ReviseRequest>,
) -> ApiResult<RecordOutcome> {
    let stage = stage_param(stage_id)?;
    let outcome = engine
        .revise_record(case_id, stage, body.payload, &actor(&headers)?)
        .await?;
    Ok(Json(outcome))
}

async fn submit_record(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
) -> ApiResult<RecordOutcome> {
    let stage = stage_param(stage_id)?;
    let outcome = engine
        .submit_record(case_id, stage, &actor(&headers)?)
        .await?;
    Ok(Json(outcome))
}

async fn approve_record(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
    OptionalApiJson(body): OptionalApiJson<ApproveRequest>,
) -> ApiResult<RecordOutcome> {
    let stage = stage_param(stage_id)?;
    let refund = body.and_then(|b| b.refund).map(|r| ApprovalRefund {
        amount: r.amount,
        method: r.method,
        notes: r.notes,
    });
    let outcome = engine
        .approve_record(case_id, stage, refund, &actor(&headers)?)
        .await?;
    Ok(Json(outcome))
}

async fn reject_record(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
    OptionalApiJson(body): OptionalApiJson<ReasonRequest>,
) -> ApiResult<RecordOutcome> {
    let stage = stage_param(stage_id)?;
    let reason = body.and_then(|b| b.reason);
    let outcome = engine
        .reject_record(case_id, stage, reason, &actor(&headers)?)
        .await?;
    Ok(Json(outcome))
}

// =============================================================================
// REFUNDS
// =============================================================================

async fn list_refunds(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    Query(query): Query<RefundQuery>,
) -> ApiResult<Vec<RefundView>> {
    Ok(Json(engine.list_refunds(case_id, query.origin).await?))
}

async fn open_refund(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<OpenRefund>,
) -> Result<(StatusCode, Json<RefundView>), ApiError> {
    let view = engine
        .open_refund(case_id, body, &actor(&headers)?)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn advance_refund_phase(
    State(engine): State<DisputeEngine>,
    Path((case_id, refund_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    ApiJson(step): ApiJson<PhaseStep>,
) -> ApiResult<RefundView> {
    let view = engine
        .advance_refund_phase(case_id, refund_id, step, &actor(&headers)?)
        .await?;
    Ok(Json(view))
}

async fn cancel_transfer(
    State(engine): State<DisputeEngine>,
    Path((case_id, refund_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    OptionalApiJson(body): OptionalApiJson<ReasonRequest>,
) -> ApiResult<RefundView> {
    let reason = body.and_then(|b| b.reason);
    let view = engine
        .cancel_transfer(case_id, refund_id, reason, &actor(&headers)?)
        .await?;
    Ok(Json(view))
}

async fn delete_refund(
    State(engine): State<DisputeEngine>,
    Path((case_id, refund_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<RefundView> {
    let view = engine
        .delete_refund(case_id, refund_id, &actor(&headers)?)
        .await?;
    Ok(Json(view))
}

// =============================================================================
// INTERNAL-LOSS CLAIMS
// =============================================================================

async fn claim_status(
    State(engine): State<DisputeEngine>,
    Path(case_id): Path<Uuid>,
) -> ApiResult<Vec<ClaimEligibility>> {
    Ok(Json(engine.claim_status_by_stage(case_id).await?))
}

async fn create_claim(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<KianSubmission>), ApiError> {
    let claim = engine
        .create_claim(case_id, stage_id, &actor(&headers)?)
        .await?;
    Ok((StatusCode::CREATED, Json(claim)))
}

async fn submit_claim(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
) -> ApiResult<KianSubmission> {
    Ok(Json(
        engine
            .submit_claim(case_id, stage_id, &actor(&headers)?)
            .await?,
    ))
}

async fn record_claim_response(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
    ApiJson(response): ApiJson<ClaimResponse>,
) -> ApiResult<KianSubmission> {
    Ok(Json(
        engine
            .record_claim_response(case_id, stage_id, response, &actor(&headers)?)
            .await?,
    ))
}

async fn close_claim(
    State(engine): State<DisputeEngine>,
    Path((case_id, stage_id)): Path<(Uuid, u8)>,
    headers: HeaderMap,
) -> ApiResult<KianSubmission> {
    Ok(Json(
        engine
            .close_claim(case_id, stage_id, &actor(&headers)?)
            .await?,
    ))
}
