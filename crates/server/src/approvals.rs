//! Request-side routes.
//!
//! - `POST /approvals`                      create a request and publish step 1
//! - `GET  /approvals`                      documents visible to the caller
//! - `GET  /approvals/{request_id}`         one document
//! - `POST /approvals/{request_id}/resend`  republish the active step
//! - `POST /internal/approvals/results`     call-path result ingestion

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use signoff_core::domain::approval::{ApprovalDocument, ApprovalStatus, ApprovalStep, RequestId};
use signoff_core::domain::employee::EmployeeId;
use signoff_core::{ApprovalResult, NewApproval, Transition};
use tracing::info;

use crate::context::{InternalContext, RequestContext};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step: u32,
    pub approver_id: EmployeeId,
    pub status: ApprovalStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub request_id: RequestId,
    pub requester_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub final_status: ApprovalStatus,
    pub steps: Vec<StepView>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ApprovalStep> for StepView {
    fn from(step: &ApprovalStep) -> Self {
        Self {
            step: step.step,
            approver_id: step.approver_id,
            status: step.status,
            updated_at: step.updated_at,
        }
    }
}

impl From<ApprovalDocument> for DocumentView {
    fn from(document: ApprovalDocument) -> Self {
        Self {
            steps: document.steps.iter().map(StepView::from).collect(),
            request_id: document.request_id,
            requester_id: document.requester_id,
            title: document.title,
            content: document.content,
            final_status: document.final_status,
            version: document.version,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultAck {
    pub outcome: &'static str,
}

impl From<&Transition> for ResultAck {
    fn from(transition: &Transition) -> Self {
        let outcome = match transition {
            Transition::Duplicate => "duplicate",
            Transition::Advanced { .. } => "advanced",
            Transition::Approved => "approved",
            Transition::Rejected { .. } => "rejected",
        };
        Self { outcome }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/approvals", post(create_approval).get(list_approvals))
        .route("/approvals/{request_id}", get(get_approval))
        .route("/approvals/{request_id}/resend", post(resend_approval))
        .route("/internal/approvals/results", post(receive_result))
}

async fn create_approval(
    State(state): State<AppState>,
    context: RequestContext,
    Json(draft): Json<NewApproval>,
) -> Result<(StatusCode, Json<DocumentView>), ApiError> {
    let document = state
        .orchestrator
        .create(&context.caller, draft)
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;
    Ok((StatusCode::CREATED, Json(document.into())))
}

async fn list_approvals(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
    let documents = state
        .orchestrator
        .list_for(&context.caller)
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;
    Ok(Json(documents.into_iter().map(DocumentView::from).collect()))
}

async fn get_approval(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
    context: RequestContext,
) -> Result<Json<DocumentView>, ApiError> {
    let document = state
        .orchestrator
        .find_one(&context.caller, RequestId(request_id))
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;
    Ok(Json(document.into()))
}

async fn resend_approval(
    State(state): State<AppState>,
    Path(request_id): Path<i64>,
    context: RequestContext,
) -> Result<Json<DocumentView>, ApiError> {
    let document = state
        .orchestrator
        .resend_pending(&context.caller, RequestId(request_id))
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;
    Ok(Json(document.into()))
}

async fn receive_result(
    State(state): State<AppState>,
    context: InternalContext,
    Json(result): Json<ApprovalResult>,
) -> Result<Json<ResultAck>, ApiError> {
    let transition = state
        .orchestrator
        .update_result(&result)
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;
    info!(
        event_name = "http.internal.result_received",
        correlation_id = %context.correlation_id,
        request_id = result.request_id.0,
        approver_id = result.approver_id.0,
        step = result.step,
        "approval result received over call path"
    );
    Ok(Json(ResultAck::from(&transition)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::testing::{call, harness, ADMIN, APPROVER, OUTSIDER, REQUESTER};

    fn two_step_body() -> serde_json::Value {
        json!({
            "title": "Monitor",
            "content": "27 inch monitor",
            "steps": [
                {"step": 1, "approverId": APPROVER.id.0},
                {"step": 2, "approverId": ADMIN.id.0}
            ]
        })
    }

    #[tokio::test]
    async fn create_persists_and_publishes_the_first_step() {
        let h = harness().await;
        let (status, body) =
            call(&h, Method::POST, "/approvals", Some(REQUESTER), Some(two_step_body())).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["requestId"], 1);
        assert_eq!(body["finalStatus"], "PENDING");
        assert_eq!(body["steps"][0]["status"], "PENDING");

        let published = h.requests.delivered().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].active_step().map(|step| step.approver_id), Some(APPROVER.id));
    }

    #[tokio::test]
    async fn create_rejects_self_approval_with_bad_request() {
        let h = harness().await;
        let body = json!({
            "title": "Desk",
            "content": "Standing desk",
            "steps": [{"step": 1, "approverId": REQUESTER.id.0}]
        });
        let (status, body) = call(&h, Method::POST, "/approvals", Some(REQUESTER), Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "approval_self_approval");
        assert!(h.requests.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn missing_identity_headers_are_unauthorized() {
        let h = harness().await;
        let (status, body) = call(&h, Method::GET, "/approvals", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn documents_are_visible_to_parties_and_admins_only() {
        let h = harness().await;
        call(&h, Method::POST, "/approvals", Some(REQUESTER), Some(two_step_body())).await;

        let (status, _) = call(&h, Method::GET, "/approvals/1", Some(APPROVER), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&h, Method::GET, "/approvals/1", Some(OUTSIDER), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (_, listed) = call(&h, Method::GET, "/approvals", Some(OUTSIDER), None).await;
        assert_eq!(listed, json!([]));

        let (status, _) = call(&h, Method::GET, "/approvals/42", Some(REQUESTER), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resend_republishes_the_active_step() {
        let h = harness().await;
        call(&h, Method::POST, "/approvals", Some(REQUESTER), Some(two_step_body())).await;

        let (status, _) =
            call(&h, Method::POST, "/approvals/1/resend", Some(REQUESTER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.requests.delivered().await.len(), 2);
    }

    #[tokio::test]
    async fn internal_results_advance_the_document() {
        let h = harness().await;
        call(&h, Method::POST, "/approvals", Some(REQUESTER), Some(two_step_body())).await;

        let result = json!({
            "approverId": APPROVER.id.0,
            "requestId": 1,
            "step": 1,
            "status": "APPROVED"
        });
        let (status, body) =
            call(&h, Method::POST, "/internal/approvals/results", None, Some(result.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"outcome": "advanced"}));

        let (_, body) =
            call(&h, Method::POST, "/internal/approvals/results", None, Some(result)).await;
        assert_eq!(body, json!({"outcome": "duplicate"}));

        let published = h.requests.delivered().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].active_step().map(|step| step.approver_id), Some(ADMIN.id));
    }
}
