//! Collaborator seams the orchestrator depends on.
//!
//! Persistence implementations live in `signoff-db`; HTTP-backed directory and
//! notification clients live in the server crate.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::approval::{ApprovalDocument, RequestId};
use crate::domain::employee::{Employee, EmployeeId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("request {request_id} was modified concurrently (expected version {expected})")]
    VersionConflict { request_id: RequestId, expected: i64 },
    #[error("request {0} already exists")]
    Duplicate(RequestId),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Durable home of approval documents.
///
/// `save` is a compare-and-swap: it succeeds only while the stored version
/// still equals `document.version`, and returns the new version.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, document: &ApprovalDocument) -> Result<(), StoreError>;
    async fn save(&self, document: &ApprovalDocument) -> Result<i64, StoreError>;
    async fn find(&self, request_id: RequestId) -> Result<Option<ApprovalDocument>, StoreError>;
    async fn list_all(&self) -> Result<Vec<ApprovalDocument>, StoreError>;
    async fn list_involving(
        &self,
        employee: EmployeeId,
    ) -> Result<Vec<ApprovalDocument>, StoreError>;
}

#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    async fn next_request_id(&self) -> Result<RequestId, StoreError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("employee {0} was not found")]
    NotFound(EmployeeId),
    #[error("employee directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn lookup(&self, id: EmployeeId) -> Result<Employee, DirectoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub request_id: RequestId,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<EmployeeId>,
    pub final_result: &'static str,
}

impl NotificationPayload {
    pub fn approved(request_id: RequestId) -> Self {
        Self { request_id, result: "approved", rejected_by: None, final_result: "approved" }
    }

    pub fn rejected(request_id: RequestId, rejected_by: EmployeeId) -> Self {
        Self {
            request_id,
            result: "rejected",
            rejected_by: Some(rejected_by),
            final_result: "rejected",
        }
    }
}

/// Best-effort delivery of outcome notices. Implementations swallow their own failures.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, recipient: EmployeeId, payload: &NotificationPayload);
}
