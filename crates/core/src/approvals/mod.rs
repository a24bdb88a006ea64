use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalStep;
use crate::domain::employee::{Employee, EmployeeId};
use crate::errors::ApprovalError;

/// One approver slot as submitted by the requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPlan {
    pub step: Option<u32>,
    pub approver_id: EmployeeId,
}

impl StepPlan {
    pub fn new(step: u32, approver_id: EmployeeId) -> Self {
        Self { step: Some(step), approver_id }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApproval {
    pub title: String,
    pub content: String,
    pub steps: Vec<StepPlan>,
}

/// Structural checks on a submitted plan: steps must be numbered `1..N` in
/// order and nobody may approve their own request. Directory-backed role
/// checks happen afterwards per step.
pub fn check_plan_entry(
    position: usize,
    requester: EmployeeId,
    plan: &StepPlan,
) -> Result<u32, ApprovalError> {
    let expected = position as u32 + 1;
    match plan.step {
        Some(step) if step == expected => {}
        Some(step) => {
            return Err(ApprovalError::InvalidStep(format!(
                "expected step {expected} at position {position}, found {step}"
            )))
        }
        None => {
            return Err(ApprovalError::InvalidStep(format!(
                "step number missing at position {position}"
            )))
        }
    }

    if plan.approver_id == requester {
        return Err(ApprovalError::SelfApprovalNotAllowed(requester));
    }

    Ok(expected)
}

pub fn check_eligible(approver: &Employee) -> Result<(), ApprovalError> {
    if approver.role.can_approve() {
        Ok(())
    } else {
        Err(ApprovalError::ApproverNotEligible(approver.id))
    }
}

/// Builds the all-pending step list for an already validated plan.
pub fn pending_steps(plan: &[StepPlan]) -> Vec<ApprovalStep> {
    plan.iter()
        .enumerate()
        .map(|(index, entry)| ApprovalStep::pending(index as u32 + 1, entry.approver_id))
        .collect()
}
