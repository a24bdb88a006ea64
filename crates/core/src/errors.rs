use thiserror::Error;

use crate::domain::approval::RequestId;
use crate::domain::employee::EmployeeId;
use crate::ports::{DirectoryError, StoreError};
use crate::transport::TransportError;

/// Business-rule failures. These are never retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval request {0} was not found")]
    RequestNotFound(RequestId),
    #[error("no step {step} for approver {approver_id} on request {request_id}")]
    ProcessNotFound { request_id: RequestId, approver_id: EmployeeId, step: u32 },
    #[error("approval queue for approver {0} is empty")]
    QueueEmpty(EmployeeId),
    #[error("request {request_id} is not queued for approver {approver_id}")]
    QueueEntryNotFound { approver_id: EmployeeId, request_id: RequestId },
    #[error("employee {0} was not found")]
    EmployeeNotFound(EmployeeId),
    #[error("invalid approval steps: {0}")]
    InvalidStep(String),
    #[error("invalid approval status: {0}")]
    InvalidStatus(String),
    #[error("employee {0} cannot approve their own request")]
    SelfApprovalNotAllowed(EmployeeId),
    #[error("employee {0} is not eligible to approve")]
    ApproverNotEligible(EmployeeId),
    #[error("request {request_id} is still contended after {attempts} attempts")]
    Conflict { request_id: RequestId, attempts: u32 },
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl ApprovalError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequestNotFound(_) => "approval_request_not_found",
            Self::ProcessNotFound { .. } => "approval_process_not_found",
            Self::QueueEmpty(_) => "approval_queue_empty",
            Self::QueueEntryNotFound { .. } => "approval_queue_entry_not_found",
            Self::EmployeeNotFound(_) => "employee_not_found",
            Self::InvalidStep(_) => "approval_invalid_step",
            Self::InvalidStatus(_) => "approval_invalid_status",
            Self::SelfApprovalNotAllowed(_) => "approval_self_approval",
            Self::ApproverNotEligible(_) => "approval_not_eligible",
            Self::Conflict { .. } => "approval_process_conflict",
            Self::Forbidden(_) => "forbidden",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<DirectoryError> for ApplicationError {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::NotFound(id) => Self::Approval(ApprovalError::EmployeeNotFound(id)),
            DirectoryError::Unavailable(message) => Self::Integration(message),
        }
    }
}

impl ApplicationError {
    /// Errors worth another delivery attempt when they surface in a queue consumer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Persistence(_) | Self::Integration(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested approval could not be found.",
            Self::Forbidden { .. } => "You are not allowed to act on this approval.",
            Self::Conflict { .. } => {
                "The approval is being updated concurrently. Please retry shortly."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } | Self::NotFound { code, .. } => code,
            Self::Forbidden { .. } => "forbidden",
            Self::Conflict { .. } => "approval_process_conflict",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Approval(error) => {
                let code = error.code();
                let message = error.to_string();
                match error {
                    ApprovalError::RequestNotFound(_)
                    | ApprovalError::ProcessNotFound { .. }
                    | ApprovalError::QueueEmpty(_)
                    | ApprovalError::QueueEntryNotFound { .. }
                    | ApprovalError::EmployeeNotFound(_) => {
                        Self::NotFound { code, message, correlation_id }
                    }
                    ApprovalError::InvalidStep(_)
                    | ApprovalError::InvalidStatus(_)
                    | ApprovalError::SelfApprovalNotAllowed(_)
                    | ApprovalError::ApproverNotEligible(_) => {
                        Self::BadRequest { code, message, correlation_id }
                    }
                    ApprovalError::Conflict { .. } => Self::Conflict { message, correlation_id },
                    ApprovalError::Forbidden(_) => Self::Forbidden { message, correlation_id },
                }
            }
            ApplicationError::Transport(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
