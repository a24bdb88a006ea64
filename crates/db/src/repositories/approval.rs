use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use signoff_core::domain::approval::{ApprovalDocument, ApprovalStatus, ApprovalStep, RequestId};
use signoff_core::domain::employee::EmployeeId;
use signoff_core::ports::{ApprovalStore, StoreError};

use super::{is_unique_violation, RepositoryError};
use crate::DbPool;

const DOCUMENT_COLUMNS: &str = "request_id, requester_id, title, content, final_status,
                                version, created_at, updated_at";

/// SQLite-backed document store. `save` is a compare-and-swap on `version`
/// inside one transaction, so step rows never drift from their document row.
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert_document(&self, document: &ApprovalDocument) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO approval_document (request_id, requester_id, title, content,
                                            final_status, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(document.request_id.0)
        .bind(document.requester_id.0)
        .bind(&document.title)
        .bind(&document.content)
        .bind(document.final_status.as_str())
        .bind(document.version)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;
        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                return Err(RepositoryError::Duplicate(document.request_id));
            }
            return Err(error.into());
        }

        for step in &document.steps {
            sqlx::query(
                "INSERT INTO approval_step (request_id, step, approver_id, status, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(document.request_id.0)
            .bind(i64::from(step.step))
            .bind(step.approver_id.0)
            .bind(step.status.as_str())
            .bind(step.updated_at.map(|at| at.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_document(&self, document: &ApprovalDocument) -> Result<i64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_document
             SET title = ?, content = ?, final_status = ?, updated_at = ?, version = version + 1
             WHERE request_id = ? AND version = ?",
        )
        .bind(&document.title)
        .bind(&document.content)
        .bind(document.final_status.as_str())
        .bind(document.updated_at.to_rfc3339())
        .bind(document.request_id.0)
        .bind(document.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM approval_document WHERE request_id = ?)",
            )
            .bind(document.request_id.0)
            .fetch_one(&mut *tx)
            .await?;
            if exists == 1 {
                debug!(
                    event_name = "db.approval.version_conflict",
                    request_id = document.request_id.0,
                    expected = document.version,
                    "stale approval document rejected"
                );
            }
            return Err(if exists == 1 {
                RepositoryError::VersionConflict {
                    request_id: document.request_id,
                    expected: document.version,
                }
            } else {
                RepositoryError::Missing(document.request_id)
            });
        }

        for step in &document.steps {
            sqlx::query(
                "UPDATE approval_step SET status = ?, updated_at = ?
                 WHERE request_id = ? AND step = ?",
            )
            .bind(step.status.as_str())
            .bind(step.updated_at.map(|at| at.to_rfc3339()))
            .bind(document.request_id.0)
            .bind(i64::from(step.step))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(document.version + 1)
    }

    async fn find_document(
        &self,
        request_id: RequestId,
    ) -> Result<Option<ApprovalDocument>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM approval_document WHERE request_id = ?"
        ))
        .bind(request_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let document = match row {
            Some(ref row) => Some(hydrate(&mut *tx, row).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(document)
    }

    async fn list_documents(
        &self,
        involving: Option<EmployeeId>,
    ) -> Result<Vec<ApprovalDocument>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let rows = match involving {
            Some(employee) => {
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM approval_document d
                     WHERE d.requester_id = ?1
                        OR EXISTS(SELECT 1 FROM approval_step s
                                  WHERE s.request_id = d.request_id AND s.approver_id = ?1)
                     ORDER BY d.request_id"
                ))
                .bind(employee.0)
                .fetch_all(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM approval_document ORDER BY request_id"
                ))
                .fetch_all(&mut *tx)
                .await?
            }
        };

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            documents.push(hydrate(&mut *tx, row).await?);
        }
        tx.commit().await?;
        Ok(documents)
    }
}

/// Attaches step rows read in the same transaction as the document row, so
/// `version` and `steps` always come from one commit.
async fn hydrate(
    conn: &mut sqlx::SqliteConnection,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ApprovalDocument, RepositoryError> {
    let mut document = row_to_document(row)?;
    let step_rows = sqlx::query(
        "SELECT step, approver_id, status, updated_at
         FROM approval_step WHERE request_id = ? ORDER BY step",
    )
    .bind(document.request_id.0)
    .fetch_all(conn)
    .await?;
    document.steps = step_rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;
    Ok(document)
}

fn decode<T>(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp `{value}`: {e}")))
}

fn parse_status(value: &str) -> Result<ApprovalStatus, RepositoryError> {
    ApprovalStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{value}`")))
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDocument, RepositoryError> {
    let final_status: String = decode(row, "final_status")?;
    let created_at: String = decode(row, "created_at")?;
    let updated_at: String = decode(row, "updated_at")?;

    Ok(ApprovalDocument {
        request_id: RequestId(decode(row, "request_id")?),
        requester_id: EmployeeId(decode(row, "requester_id")?),
        title: decode(row, "title")?,
        content: decode(row, "content")?,
        steps: Vec::new(),
        final_status: parse_status(&final_status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        version: decode(row, "version")?,
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let step: i64 = decode(row, "step")?;
    let status: String = decode(row, "status")?;
    let updated_at: Option<String> = decode(row, "updated_at")?;

    Ok(ApprovalStep {
        step: u32::try_from(step)
            .map_err(|_| RepositoryError::Decode(format!("step {step} out of range")))?,
        approver_id: EmployeeId(decode(row, "approver_id")?),
        status: parse_status(&status)?,
        updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn insert(&self, document: &ApprovalDocument) -> Result<(), StoreError> {
        Ok(self.insert_document(document).await?)
    }

    async fn save(&self, document: &ApprovalDocument) -> Result<i64, StoreError> {
        Ok(self.save_document(document).await?)
    }

    async fn find(&self, request_id: RequestId) -> Result<Option<ApprovalDocument>, StoreError> {
        Ok(self.find_document(request_id).await?)
    }

    async fn list_all(&self) -> Result<Vec<ApprovalDocument>, StoreError> {
        Ok(self.list_documents(None).await?)
    }

    async fn list_involving(
        &self,
        employee: EmployeeId,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        Ok(self.list_documents(Some(employee)).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use signoff_core::domain::approval::{
        ApprovalDocument, ApprovalStatus, ApprovalStep, RequestId, ResultStatus,
    };
    use signoff_core::domain::employee::EmployeeId;
    use signoff_core::ports::{ApprovalStore, StoreError};

    use super::SqlApprovalStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlApprovalStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlApprovalStore::new(pool)
    }

    fn document(request_id: i64) -> ApprovalDocument {
        ApprovalDocument::open(
            RequestId(request_id),
            EmployeeId(1),
            "Laptop",
            "Replace broken laptop",
            vec![ApprovalStep::pending(1, EmployeeId(10)), ApprovalStep::pending(2, EmployeeId(20))],
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp"),
        )
    }

    #[tokio::test]
    async fn insert_then_find_restores_document_and_steps() {
        let store = store().await;
        let original = document(1);
        store.insert(&original).await.expect("insert");

        let loaded = store.find(RequestId(1)).await.expect("find").expect("present");
        assert_eq!(loaded, original);
        assert!(store.find(RequestId(2)).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn inserting_an_existing_request_reports_duplicate() {
        let store = store().await;
        store.insert(&document(1)).await.expect("insert");

        let error = store.insert(&document(1)).await.expect_err("duplicate");
        assert_eq!(error, StoreError::Duplicate(RequestId(1)));
    }

    #[tokio::test]
    async fn save_bumps_version_and_persists_step_changes() {
        let store = store().await;
        store.insert(&document(1)).await.expect("insert");

        let mut loaded = store.find(RequestId(1)).await.expect("find").expect("present");
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("timestamp");
        loaded.apply_result(EmployeeId(10), 1, ResultStatus::Approved, now).expect("apply");

        let version = store.save(&loaded).await.expect("save");
        assert_eq!(version, 1);

        let reloaded = store.find(RequestId(1)).await.expect("find").expect("present");
        assert_eq!(reloaded.version, 1);
        assert_eq!(reloaded.steps[0].status, ApprovalStatus::Approved);
        assert_eq!(reloaded.steps[0].updated_at, Some(now));
        assert_eq!(reloaded.steps[1].status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn stale_save_is_a_version_conflict_and_changes_nothing() {
        let store = store().await;
        store.insert(&document(1)).await.expect("insert");

        let mut first = store.find(RequestId(1)).await.expect("find").expect("present");
        let mut second = first.clone();
        let now = Utc::now();
        first.apply_result(EmployeeId(10), 1, ResultStatus::Approved, now).expect("apply");
        second.apply_result(EmployeeId(10), 1, ResultStatus::Rejected, now).expect("apply");

        store.save(&first).await.expect("first save wins");
        let error = store.save(&second).await.expect_err("second save conflicts");
        assert_eq!(error, StoreError::VersionConflict { request_id: RequestId(1), expected: 0 });

        let stored = store.find(RequestId(1)).await.expect("find").expect("present");
        assert_eq!(stored.steps[0].status, ApprovalStatus::Approved);
        assert_eq!(stored.final_status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn reads_release_their_transaction_and_agree_with_the_latest_save() {
        let store = store().await;
        store.insert(&document(1)).await.expect("insert");

        let mut loaded = store.find(RequestId(1)).await.expect("find").expect("present");
        assert_eq!(store.list_all().await.expect("list").len(), 1);
        loaded
            .apply_result(EmployeeId(10), 1, ResultStatus::Approved, Utc::now())
            .expect("apply");
        store.save(&loaded).await.expect("single-connection pool is free again");

        for document in store.list_involving(EmployeeId(10)).await.expect("involving") {
            assert_eq!(document.version, 1);
            assert_eq!(document.steps[0].status, ApprovalStatus::Approved);
        }
        let reloaded = store.find(RequestId(1)).await.expect("find").expect("present");
        assert_eq!((reloaded.version, reloaded.steps[0].status), (1, ApprovalStatus::Approved));
    }

    #[tokio::test]
    async fn saving_an_unknown_request_is_a_backend_error() {
        let store = store().await;
        let error = store.save(&document(7)).await.expect_err("missing");
        assert!(matches!(error, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn list_involving_matches_requesters_and_approvers() {
        let store = store().await;
        store.insert(&document(1)).await.expect("insert");
        let mut other = document(2);
        other.requester_id = EmployeeId(5);
        other.steps = vec![ApprovalStep::pending(1, EmployeeId(30))];
        store.insert(&other).await.expect("insert");

        let ids = |docs: Vec<ApprovalDocument>| {
            docs.into_iter().map(|doc| doc.request_id.0).collect::<Vec<_>>()
        };
        assert_eq!(ids(store.list_all().await.expect("all")), vec![1, 2]);
        assert_eq!(ids(store.list_involving(EmployeeId(20)).await.expect("approver")), vec![1]);
        assert_eq!(ids(store.list_involving(EmployeeId(5)).await.expect("requester")), vec![2]);
        assert!(store.list_involving(EmployeeId(99)).await.expect("nobody").is_empty());
    }
}
