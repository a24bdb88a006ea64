use sqlx::Executor;

use signoff_core::domain::employee::Role;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Deterministic directory used by local runs and the smoke flow: one
/// requester, two approvers in sequence, and an admin.
const DEMO_EMPLOYEES: &[DemoEmployee] = &[
    DemoEmployee { id: 1, name: "Riley Requester", role: Role::Employee },
    DemoEmployee { id: 10, name: "Avery First-Approver", role: Role::Approver },
    DemoEmployee { id: 20, name: "Jordan Second-Approver", role: Role::Approver },
    DemoEmployee { id: 99, name: "Morgan Admin", role: Role::Admin },
];

struct DemoEmployee {
    id: i64,
    name: &'static str,
    role: Role,
}

pub struct DemoDirectory;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub employees_seeded: Vec<(i64, &'static str)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl DemoDirectory {
    /// Upserts the demo employees. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        let now = chrono::Utc::now().to_rfc3339();
        for employee in DEMO_EMPLOYEES {
            tx.execute(
                sqlx::query(
                    "INSERT INTO employee (id, name, role, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET
                         name = excluded.name,
                         role = excluded.role,
                         updated_at = excluded.updated_at",
                )
                .bind(employee.id)
                .bind(employee.name)
                .bind(employee.role.as_str())
                .bind(&now)
                .bind(&now),
            )
            .await?;
        }
        tx.commit().await?;

        Ok(SeedResult {
            employees_seeded: DEMO_EMPLOYEES
                .iter()
                .map(|employee| (employee.id, employee.name))
                .collect(),
        })
    }

    /// Checks every demo employee exists with its expected role.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(DEMO_EMPLOYEES.len());
        for employee in DEMO_EMPLOYEES {
            let present: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM employee WHERE id = ? AND role = ?)")
                    .bind(employee.id)
                    .bind(employee.role.as_str())
                    .fetch_one(pool)
                    .await?;
            checks.push((employee.name, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}
