pub mod approvals;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod orchestrator;
pub mod ports;
pub mod queue;
pub mod retry;
pub mod transport;

pub use approvals::{NewApproval, StepPlan};
pub use dispatcher::Dispatcher;
pub use domain::approval::{
    ApprovalDocument, ApprovalStatus, ApprovalStep, RequestId, ResultStatus, Transition,
};
pub use domain::employee::{Caller, Employee, EmployeeId, Role};
pub use errors::{ApplicationError, ApprovalError, InterfaceError};
pub use orchestrator::{OrchestratorSettings, RequestOrchestrator};
pub use ports::{
    ApprovalStore, DirectoryError, EmployeeDirectory, NotificationPayload, NotificationSink,
    SequenceGenerator, StoreError,
};
pub use queue::ApprovalQueue;
pub use retry::RetryPolicy;
pub use transport::{ApprovalRequest, ApprovalResult, TransportError};
