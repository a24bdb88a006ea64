//! Processing-side routes.
//!
//! - `GET  /process/{approver_id}`               the approver's queue, head first
//! - `POST /process/{approver_id}/{request_id}`  act on the head of the queue
//! - `POST /internal/process/requests`           call-path request ingestion
//! - `POST /internal/process/results`            call-path result acknowledgement

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use signoff_core::domain::approval::{ApprovalStatus, RequestId};
use signoff_core::domain::employee::EmployeeId;
use signoff_core::errors::ApplicationError;
use signoff_core::{ApprovalRequest, ApprovalResult};

use crate::context::{InternalContext, RequestContext};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ActionBody {
    pub status: ApprovalStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RemovalAck {
    pub removed: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process/{approver_id}", get(get_queue))
        .route("/process/{approver_id}/{request_id}", post(act))
        .route("/internal/process/requests", post(receive_request))
        .route("/internal/process/results", post(receive_result))
}

async fn get_queue(
    State(state): State<AppState>,
    Path(approver_id): Path<i64>,
    context: RequestContext,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    state
        .dispatcher
        .queue_for(&context.caller, EmployeeId(approver_id))
        .map(Json)
        .map_err(|error| {
            ApiError::from_application(ApplicationError::from(error), &context.correlation_id)
        })
}

async fn act(
    State(state): State<AppState>,
    Path((approver_id, request_id)): Path<(i64, i64)>,
    context: RequestContext,
    Json(body): Json<ActionBody>,
) -> Result<Json<ApprovalResult>, ApiError> {
    let result = state
        .dispatcher
        .handle(&context.caller, EmployeeId(approver_id), RequestId(request_id), body.status)
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;
    Ok(Json(result))
}

async fn receive_request(
    State(state): State<AppState>,
    _context: InternalContext,
    Json(request): Json<ApprovalRequest>,
) -> StatusCode {
    state.dispatcher.accept_request(request);
    StatusCode::ACCEPTED
}

async fn receive_result(
    State(state): State<AppState>,
    _context: InternalContext,
    Json(result): Json<ApprovalResult>,
) -> Json<RemovalAck> {
    Json(RemovalAck { removed: state.dispatcher.accept_result(&result) })
}
