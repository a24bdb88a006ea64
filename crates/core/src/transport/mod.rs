pub mod bus;
pub mod ingress;
pub mod messages;

use async_trait::async_trait;
use thiserror::Error;

pub use messages::{ApprovalRequest, ApprovalResult, StepMessage};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("peer rejected delivery with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("channel closed: {0}")]
    Closed(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether resending the same message can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Closed(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

/// Request side to processing side: "this document needs its active approver".
#[async_trait]
pub trait RequestDelivery: Send + Sync {
    async fn deliver_request(&self, request: &ApprovalRequest) -> Result<(), TransportError>;
}

/// Processing side to request side: "this approver recorded a result".
#[async_trait]
pub trait ResultDelivery: Send + Sync {
    async fn deliver_result(&self, result: &ApprovalResult) -> Result<(), TransportError>;
}
