use async_trait::async_trait;
use thiserror::Error;

use signoff_core::domain::approval::RequestId;
use signoff_core::domain::employee::{Employee, EmployeeId};
use signoff_core::ports::{DirectoryError, StoreError};

pub mod approval;
pub mod employee;
pub mod memory;
pub mod sequence;

pub use approval::SqlApprovalStore;
pub use employee::SqlEmployeeRepository;
pub use memory::{InMemoryApprovalStore, InMemoryEmployeeDirectory, InMemorySequenceGenerator};
pub use sequence::SqlSequenceGenerator;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("request {request_id} is no longer at version {expected}")]
    VersionConflict { request_id: RequestId, expected: i64 },
    #[error("request {0} already exists")]
    Duplicate(RequestId),
    #[error("request {0} does not exist")]
    Missing(RequestId),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::VersionConflict { request_id, expected } => {
                StoreError::VersionConflict { request_id, expected }
            }
            RepositoryError::Duplicate(request_id) => StoreError::Duplicate(request_id),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<RepositoryError> for DirectoryError {
    fn from(error: RepositoryError) -> Self {
        DirectoryError::Unavailable(error.to_string())
    }
}

/// Local employee records backing the directory when no remote one is configured.
#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    async fn find_by_id(&self, id: EmployeeId) -> Result<Option<Employee>, RepositoryError>;
    async fn save(&self, employee: Employee) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<Employee>, RepositoryError>;
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
