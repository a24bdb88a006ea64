//! Wire shapes shared by the synchronous call path and the durable queue.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalDocument, ApprovalStatus, RequestId, ResultStatus};
use crate::domain::employee::EmployeeId;
use crate::transport::TransportError;

pub const EXCHANGE_NAME: &str = "approval.exchange";
pub const REQUEST_ROUTING_KEY: &str = "approval.request";
pub const RESULT_ROUTING_KEY: &str = "approval.result";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMessage {
    pub step: u32,
    pub approver_id: EmployeeId,
    pub status: ApprovalStatus,
}

/// Snapshot of a document propagated to the processing side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: RequestId,
    pub requester_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub steps: Vec<StepMessage>,
}

impl ApprovalRequest {
    pub fn from_document(document: &ApprovalDocument) -> Self {
        Self {
            request_id: document.request_id,
            requester_id: document.requester_id,
            title: document.title.clone(),
            content: document.content.clone(),
            steps: document
                .steps
                .iter()
                .map(|step| StepMessage {
                    step: step.step,
                    approver_id: step.approver_id,
                    status: step.status,
                })
                .collect(),
        }
    }

    /// Lowest pending step. A snapshot carrying a rejection has none.
    pub fn active_step(&self) -> Option<&StepMessage> {
        if self.steps.iter().any(|step| step.status == ApprovalStatus::Rejected) {
            return None;
        }
        self.steps
            .iter()
            .filter(|step| step.status == ApprovalStatus::Pending)
            .min_by_key(|step| step.step)
    }

    pub fn pending_step_for(&self, approver_id: EmployeeId) -> Option<&StepMessage> {
        self.steps
            .iter()
            .filter(|step| step.status == ApprovalStatus::Pending && step.approver_id == approver_id)
            .min_by_key(|step| step.step)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    pub approver_id: EmployeeId,
    pub request_id: RequestId,
    pub step: u32,
    pub status: ResultStatus,
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(message).map_err(|error| TransportError::Malformed(error.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(payload).map_err(|error| TransportError::Malformed(error.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{decode, ApprovalRequest, ApprovalResult};
    use crate::domain::approval::{
        ApprovalDocument, ApprovalStatus, ApprovalStep, RequestId, ResultStatus,
    };
    use crate::domain::employee::EmployeeId;
    use crate::transport::TransportError;

    #[test]
    fn request_snapshot_tracks_active_step() {
        let mut document = ApprovalDocument::open(
            RequestId(4),
            EmployeeId(1),
            "trip",
            "conference travel",
            vec![ApprovalStep::pending(1, EmployeeId(10)), ApprovalStep::pending(2, EmployeeId(20))],
            Utc::now(),
        );
        document.steps[0].status = ApprovalStatus::Approved;

        let request = ApprovalRequest::from_document(&document);
        assert_eq!(request.active_step().map(|step| step.approver_id), Some(EmployeeId(20)));
        assert_eq!(request.pending_step_for(EmployeeId(10)), None);
        assert_eq!(request.pending_step_for(EmployeeId(20)).map(|step| step.step), Some(2));
    }

    #[test]
    fn result_uses_camel_case_on_the_wire() {
        let decoded: ApprovalResult = decode(
            br#"{"approverId":10,"requestId":4,"step":1,"status":"REJECTED"}"#,
        )
        .expect("valid payload");

        assert_eq!(
            decoded,
            ApprovalResult {
                approver_id: EmployeeId(10),
                request_id: RequestId(4),
                step: 1,
                status: ResultStatus::Rejected,
            }
        );
    }

    #[test]
    fn pending_is_not_a_wire_result() {
        let error = decode::<ApprovalResult>(
            br#"{"approverId":10,"requestId":4,"step":1,"status":"PENDING"}"#,
        )
        .expect_err("PENDING is not a result");
        assert!(matches!(error, TransportError::Malformed(_)));
    }
}
