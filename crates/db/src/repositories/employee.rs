use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use signoff_core::domain::employee::{Employee, EmployeeId, Role};
use signoff_core::ports::{DirectoryError, EmployeeDirectory};

use super::{EmployeeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_employee(row: &sqlx::sqlite::SqliteRow) -> Result<Employee, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let role = Role::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role}`")))?;
    Ok(Employee { id: EmployeeId(id), name, role })
}

#[async_trait]
impl EmployeeRepository for SqlEmployeeRepository {
    async fn find_by_id(&self, id: EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, role FROM employee WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_employee(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO employee (id, name, role, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 role = excluded.role,
                 updated_at = excluded.updated_at",
        )
        .bind(employee.id.0)
        .bind(&employee.name)
        .bind(employee.role.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Employee>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, role FROM employee ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_employee).collect::<Result<Vec<_>, _>>()
    }
}

#[async_trait]
impl EmployeeDirectory for SqlEmployeeRepository {
    async fn lookup(&self, id: EmployeeId) -> Result<Employee, DirectoryError> {
        self.find_by_id(id).await?.ok_or(DirectoryError::NotFound(id))
    }
}
