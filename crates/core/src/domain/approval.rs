use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;
use crate::errors::ApprovalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status shared by individual steps and by the document as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The outcome an approver may record. `PENDING` is never a valid result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Approved,
    Rejected,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        ApprovalStatus::from(*self).as_str()
    }
}

impl From<ResultStatus> for ApprovalStatus {
    fn from(value: ResultStatus) -> Self {
        match value {
            ResultStatus::Approved => Self::Approved,
            ResultStatus::Rejected => Self::Rejected,
        }
    }
}

impl TryFrom<ApprovalStatus> for ResultStatus {
    type Error = ApprovalError;

    fn try_from(value: ApprovalStatus) -> Result<Self, Self::Error> {
        match value {
            ApprovalStatus::Approved => Ok(Self::Approved),
            ApprovalStatus::Rejected => Ok(Self::Rejected),
            ApprovalStatus::Pending => {
                Err(ApprovalError::InvalidStatus("PENDING is not an approval result".to_string()))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step: u32,
    pub approver_id: EmployeeId,
    pub status: ApprovalStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    pub fn pending(step: u32, approver_id: EmployeeId) -> Self {
        Self { step, approver_id, status: ApprovalStatus::Pending, updated_at: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDocument {
    pub request_id: RequestId,
    pub requester_id: EmployeeId,
    pub title: String,
    pub content: String,
    pub steps: Vec<ApprovalStep>,
    pub final_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token. Stores bump it on every successful save.
    pub version: i64,
}

/// What a recorded result did to the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The step already carried this result; nothing changed.
    Duplicate,
    /// The step was approved and `next` is now active.
    Advanced { next: ApprovalStep },
    /// The last step was approved.
    Approved,
    /// The active step was rejected by `by`.
    Rejected { by: EmployeeId },
}

impl Transition {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

impl ApprovalDocument {
    pub fn open(
        request_id: RequestId,
        requester_id: EmployeeId,
        title: impl Into<String>,
        content: impl Into<String>,
        steps: Vec<ApprovalStep>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            requester_id,
            title: title.into(),
            content: content.into(),
            steps,
            final_status: ApprovalStatus::Pending,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.final_status.is_terminal()
    }

    /// Lowest-numbered pending step, or `None` once the document is final.
    pub fn active_step(&self) -> Option<&ApprovalStep> {
        if self.is_terminal() {
            return None;
        }
        self.steps
            .iter()
            .filter(|step| step.status == ApprovalStatus::Pending)
            .min_by_key(|step| step.step)
    }

    pub fn involves(&self, employee: EmployeeId) -> bool {
        self.requester_id == employee || self.steps.iter().any(|step| step.approver_id == employee)
    }

    /// Records `status` for `(step, approver_id)`.
    ///
    /// Re-applying a result the step already carries is a no-op reported as
    /// [`Transition::Duplicate`]. A different result on a decided step, or any
    /// result on a pending step that is not the active one, is rejected
    /// without touching the document.
    pub fn apply_result(
        &mut self,
        approver_id: EmployeeId,
        step: u32,
        status: ResultStatus,
        now: DateTime<Utc>,
    ) -> Result<Transition, ApprovalError> {
        let request_id = self.request_id;
        let index = self
            .steps
            .iter()
            .position(|candidate| candidate.step == step && candidate.approver_id == approver_id)
            .ok_or(ApprovalError::ProcessNotFound { request_id, approver_id, step })?;

        let recorded = self.steps[index].status;
        let requested = ApprovalStatus::from(status);
        if recorded != ApprovalStatus::Pending {
            if recorded == requested {
                return Ok(Transition::Duplicate);
            }
            return Err(ApprovalError::InvalidStatus(format!(
                "step {step} of request {request_id} is already {}",
                recorded.as_str()
            )));
        }

        let active = self.active_step().map(|candidate| candidate.step);
        if active != Some(step) {
            return Err(ApprovalError::InvalidStatus(format!(
                "step {step} of request {request_id} is not the active step"
            )));
        }

        let target = &mut self.steps[index];
        target.status = requested;
        target.updated_at = Some(now);
        self.updated_at = now;

        match status {
            ResultStatus::Rejected => {
                self.final_status = ApprovalStatus::Rejected;
                Ok(Transition::Rejected { by: approver_id })
            }
            ResultStatus::Approved => match self.active_step().cloned() {
                Some(next) => Ok(Transition::Advanced { next }),
                None => {
                    self.final_status = ApprovalStatus::Approved;
                    Ok(Transition::Approved)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        ApprovalDocument, ApprovalStatus, ApprovalStep, RequestId, ResultStatus, Transition,
    };
    use crate::domain::employee::EmployeeId;
    use crate::errors::ApprovalError;

    fn document(approvers: &[i64]) -> ApprovalDocument {
        let steps = approvers
            .iter()
            .enumerate()
            .map(|(index, id)| ApprovalStep::pending(index as u32 + 1, EmployeeId(*id)))
            .collect();
        ApprovalDocument::open(RequestId(7), EmployeeId(1), "laptop", "new laptop", steps, Utc::now())
    }

    #[test]
    fn active_step_is_lowest_pending_step() {
        let mut doc = document(&[10, 20]);
        assert_eq!(doc.active_step().map(|step| step.step), Some(1));

        doc.steps[0].status = ApprovalStatus::Approved;
        assert_eq!(doc.active_step().map(|step| step.approver_id), Some(EmployeeId(20)));
    }

    #[test]
    fn terminal_document_has_no_active_step() {
        let mut doc = document(&[10, 20]);
        doc.final_status = ApprovalStatus::Rejected;
        assert_eq!(doc.active_step(), None);
    }

    #[test]
    fn approving_a_middle_step_advances() {
        let mut doc = document(&[10, 20]);
        let transition = doc
            .apply_result(EmployeeId(10), 1, ResultStatus::Approved, Utc::now())
            .expect("step 1 is active");

        match transition {
            Transition::Advanced { next } => assert_eq!(next.step, 2),
            other => panic!("unexpected transition {other:?}"),
        }
        assert_eq!(doc.final_status, ApprovalStatus::Pending);
        assert!(doc.steps[0].updated_at.is_some());
    }

    #[test]
    fn approving_the_last_step_finalizes() {
        let mut doc = document(&[10]);
        let transition = doc
            .apply_result(EmployeeId(10), 1, ResultStatus::Approved, Utc::now())
            .expect("step 1 is active");

        assert_eq!(transition, Transition::Approved);
        assert_eq!(doc.final_status, ApprovalStatus::Approved);
    }

    #[test]
    fn rejecting_finalizes_and_leaves_later_steps_pending() {
        let mut doc = document(&[10, 20]);
        let transition = doc
            .apply_result(EmployeeId(10), 1, ResultStatus::Rejected, Utc::now())
            .expect("step 1 is active");

        assert_eq!(transition, Transition::Rejected { by: EmployeeId(10) });
        assert_eq!(doc.final_status, ApprovalStatus::Rejected);
        assert_eq!(doc.steps[1].status, ApprovalStatus::Pending);
    }

    #[test]
    fn repeated_result_is_a_duplicate() {
        let mut doc = document(&[10, 20]);
        doc.apply_result(EmployeeId(10), 1, ResultStatus::Approved, Utc::now())
            .expect("first apply");
        let before = doc.clone();

        let transition = doc
            .apply_result(EmployeeId(10), 1, ResultStatus::Approved, Utc::now())
            .expect("duplicate apply");

        assert!(transition.is_duplicate());
        assert_eq!(doc, before);
    }

    #[test]
    fn conflicting_result_on_decided_step_is_invalid() {
        let mut doc = document(&[10, 20]);
        doc.apply_result(EmployeeId(10), 1, ResultStatus::Approved, Utc::now())
            .expect("first apply");

        let error = doc
            .apply_result(EmployeeId(10), 1, ResultStatus::Rejected, Utc::now())
            .expect_err("flip must fail");
        assert!(matches!(error, ApprovalError::InvalidStatus(_)));
    }

    #[test]
    fn out_of_order_step_is_invalid_and_untouched() {
        let mut doc = document(&[10, 20]);
        let before = doc.clone();

        let error = doc
            .apply_result(EmployeeId(20), 2, ResultStatus::Approved, Utc::now())
            .expect_err("step 2 is not active");

        assert!(matches!(error, ApprovalError::InvalidStatus(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn unknown_step_or_approver_is_process_not_found() {
        let mut doc = document(&[10, 20]);

        let error = doc
            .apply_result(EmployeeId(20), 1, ResultStatus::Approved, Utc::now())
            .expect_err("approver mismatch");
        assert!(matches!(error, ApprovalError::ProcessNotFound { step: 1, .. }));

        let error = doc
            .apply_result(EmployeeId(10), 5, ResultStatus::Approved, Utc::now())
            .expect_err("no such step");
        assert!(matches!(error, ApprovalError::ProcessNotFound { step: 5, .. }));
    }

    #[test]
    fn pending_is_not_a_result() {
        assert!(ResultStatus::try_from(ApprovalStatus::Pending).is_err());
        assert_eq!(ResultStatus::try_from(ApprovalStatus::Rejected), Ok(ResultStatus::Rejected));
    }

    #[test]
    fn involves_requester_and_approvers_only() {
        let doc = document(&[10, 20]);
        assert!(doc.involves(EmployeeId(1)));
        assert!(doc.involves(EmployeeId(20)));
        assert!(!doc.involves(EmployeeId(30)));
    }
}
