use async_trait::async_trait;

use signoff_core::domain::approval::RequestId;
use signoff_core::ports::{SequenceGenerator, StoreError};

use super::RepositoryError;
use crate::DbPool;

const REQUEST_SEQUENCE: &str = "approval_request";

/// Monotonic request ids backed by a single counter row.
pub struct SqlSequenceGenerator {
    pool: DbPool,
}

impl SqlSequenceGenerator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn advance(&self) -> Result<i64, RepositoryError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO request_sequence (name, value) VALUES (?, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(REQUEST_SEQUENCE)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }
}

#[async_trait]
impl SequenceGenerator for SqlSequenceGenerator {
    async fn next_request_id(&self) -> Result<RequestId, StoreError> {
        Ok(RequestId(self.advance().await?))
    }
}

#[cfg(test)]
mod tests {
    use signoff_core::domain::approval::RequestId;
    use signoff_core::ports::SequenceGenerator;

    use super::SqlSequenceGenerator;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let sequence = SqlSequenceGenerator::new(pool);

        assert_eq!(sequence.next_request_id().await.expect("first"), RequestId(1));
        assert_eq!(sequence.next_request_id().await.expect("second"), RequestId(2));
        assert_eq!(sequence.next_request_id().await.expect("third"), RequestId(3));
    }
}
