use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::RwLock;

use signoff_core::domain::approval::{ApprovalDocument, RequestId};
use signoff_core::domain::employee::{Employee, EmployeeId};
use signoff_core::ports::{
    ApprovalStore, DirectoryError, EmployeeDirectory, SequenceGenerator, StoreError,
};

use super::{EmployeeRepository, RepositoryError};

/// Process-local document store with the same version check as the SQL one.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    documents: RwLock<BTreeMap<RequestId, ApprovalDocument>>,
}

#[async_trait::async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, document: &ApprovalDocument) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&document.request_id) {
            return Err(StoreError::Duplicate(document.request_id));
        }
        documents.insert(document.request_id, document.clone());
        Ok(())
    }

    async fn save(&self, document: &ApprovalDocument) -> Result<i64, StoreError> {
        let mut documents = self.documents.write().await;
        let stored = documents.get_mut(&document.request_id).ok_or_else(|| {
            StoreError::Backend(format!("request {} does not exist", document.request_id))
        })?;
        if stored.version != document.version {
            return Err(StoreError::VersionConflict {
                request_id: document.request_id,
                expected: document.version,
            });
        }
        *stored = document.clone();
        stored.version += 1;
        Ok(stored.version)
    }

    async fn find(&self, request_id: RequestId) -> Result<Option<ApprovalDocument>, StoreError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&request_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<ApprovalDocument>, StoreError> {
        let documents = self.documents.read().await;
        Ok(documents.values().cloned().collect())
    }

    async fn list_involving(
        &self,
        employee: EmployeeId,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        let documents = self.documents.read().await;
        Ok(documents.values().filter(|doc| doc.involves(employee)).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemorySequenceGenerator {
    last: AtomicI64,
}

#[async_trait::async_trait]
impl SequenceGenerator for InMemorySequenceGenerator {
    async fn next_request_id(&self) -> Result<RequestId, StoreError> {
        Ok(RequestId(self.last.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

#[derive(Default)]
pub struct InMemoryEmployeeDirectory {
    employees: RwLock<HashMap<EmployeeId, Employee>>,
}

impl InMemoryEmployeeDirectory {
    pub fn with_employees(employees: impl IntoIterator<Item = Employee>) -> Self {
        let employees = employees.into_iter().map(|employee| (employee.id, employee)).collect();
        Self { employees: RwLock::new(employees) }
    }
}

#[async_trait::async_trait]
impl EmployeeRepository for InMemoryEmployeeDirectory {
    async fn find_by_id(&self, id: EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        Ok(employees.get(&id).cloned())
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut employees = self.employees.write().await;
        employees.insert(employee.id, employee);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        let mut listed: Vec<Employee> = employees.values().cloned().collect();
        listed.sort_by_key(|employee| employee.id);
        Ok(listed)
    }
}

#[async_trait::async_trait]
impl EmployeeDirectory for InMemoryEmployeeDirectory {
    async fn lookup(&self, id: EmployeeId) -> Result<Employee, DirectoryError> {
        let employees = self.employees.read().await;
        employees.get(&id).cloned().ok_or(DirectoryError::NotFound(id))
    }
}
