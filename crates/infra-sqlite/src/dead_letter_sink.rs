// SQLite DeadLetterSink Implementation

use crate::error::{map_sqlx_error, to_u32};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::SqlitePool;
use steadfast_core::domain::{DeadLetterRecord, JobPayload};
use steadfast_core::error::Result;
use steadfast_core::port::DeadLetterSink;
use tracing::debug;

/// Durable dead letter table; records never expire
pub struct SqliteDeadLetterSink {
    pool: SqlitePool,
}

impl SqliteDeadLetterSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for SqliteDeadLetterSink {
    async fn record(&self, item: DeadLetterRecord) -> Result<()> {
        // Unique (original_queue, original_job_id): a redelivered job keeps its first record
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO dead_letters (
                original_queue, original_job_id, job_name, payload,
                failure_reason, attempts_made, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.original_queue)
        .bind(&item.original_job_id)
        .bind(&item.job_name)
        .bind(item.payload.as_value().to_string())
        .bind(&item.failure_reason)
        .bind(i64::from(item.attempts_made))
        .bind(item.failed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            debug!(
                queue = %item.original_queue,
                job_id = %item.original_job_id,
                "Dead letter already recorded, keeping the first"
            );
        }
        Ok(())
    }

    async fn for_each(&self, visitor: &mut (dyn for<'r> FnMut(&'r DeadLetterRecord) + Send)) -> Result<()> {
        let mut rows = sqlx::query_as::<_, DeadLetterRow>("SELECT * FROM dead_letters ORDER BY seq ASC").fetch(&self.pool);

        while let Some(row) = rows.try_next().await.map_err(map_sqlx_error)? {
            visitor(&row.into_record()?);
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    original_queue: String,
    original_job_id: String,
    job_name: String,
    payload: String,
    failure_reason: String,
    attempts_made: i64,
    failed_at: i64,
}

impl DeadLetterRow {
    fn into_record(self) -> Result<DeadLetterRecord> {
        Ok(DeadLetterRecord {
            original_queue: self.original_queue,
            original_job_id: self.original_job_id,
            job_name: self.job_name,
            payload: JobPayload::new(serde_json::from_str(&self.payload)?),
            failure_reason: self.failure_reason,
            attempts_made: to_u32("attempts_made", self.attempts_made)?,
            failed_at: self.failed_at,
        })
    }
}
