// SQLite JobRepository Implementation

use crate::error::{map_sqlx_error, to_i64, to_u32, to_u64};
use async_trait::async_trait;
use sqlx::SqlitePool;
use steadfast_core::domain::{Backoff, Job, JobId, JobName, JobPayload, JobState, LEASE_EXPIRED_ERROR};
use steadfast_core::error::{AppError, Result};
use steadfast_core::port::JobRepository;
use tracing::{debug, info};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Explain a fenced write that matched no row
    async fn ownership_conflict(&self, job: &Job) -> Result<AppError> {
        let current: Option<(String, i64)> = sqlx::query_as("SELECT state, attempts_made FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(match current {
            Some((state, attempts_made)) => AppError::Conflict(format!(
                "job {} no longer owned by attempt {} (state {}, attempt {})",
                job.id, job.attempts_made, state, attempts_made
            )),
            None => AppError::Conflict(format!("job {} no longer exists", job.id)),
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let backoff = serde_json::to_string(&job.backoff)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, name, payload, state, priority,
                attempts_made, max_attempts, backoff, timeout_ms,
                created_at, run_at, started_at, finished_at, lease_expires_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(job.name.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(job.state.as_str())
        .bind(job.priority)
        .bind(i64::from(job.attempts_made))
        .bind(i64::from(job.max_attempts))
        .bind(backoff)
        .bind(job.timeout_ms.map(to_i64))
        .bind(job.created_at)
        .bind(job.run_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.lease_expires_at)
        .bind(&job.last_error)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_next(&self, queue: &str, now_millis: i64, lease_ms: u64) -> Result<Option<Job>> {
        // Single statement: select and claim happen under one write lock
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'IN_PROGRESS',
                attempts_made = attempts_made + 1,
                started_at = ?,
                lease_expires_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND state = 'PENDING' AND run_at <= ?
                ORDER BY priority DESC, run_at ASC, seq ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(now_millis.saturating_add(to_i64(lease_ms)))
        .bind(queue)
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let job = row.map(JobRow::into_job).transpose()?;
        if let Some(job) = &job {
            debug!(job_id = %job.id, attempt = job.attempts_made, "Job claimed");
        }
        Ok(job)
    }

    async fn settle(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, run_at = ?, started_at = ?, finished_at = ?,
                lease_expires_at = ?, last_error = ?
            WHERE id = ? AND state = 'IN_PROGRESS' AND attempts_made = ?
            "#,
        )
        .bind(job.state.as_str())
        .bind(job.run_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.lease_expires_at)
        .bind(&job.last_error)
        .bind(&job.id)
        .bind(i64::from(job.attempts_made))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.ownership_conflict(job).await?);
        }
        Ok(())
    }

    async fn remove_claimed(&self, job: &Job) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND state = 'IN_PROGRESS' AND attempts_made = ?")
            .bind(&job.id)
            .bind(i64::from(job.attempts_made))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.ownership_conflict(job).await?);
        }
        Ok(())
    }

    async fn remove_dead_lettered(&self, job: &Job) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND state = 'DEAD_LETTERED'")
            .bind(&job.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("job {} is not dead-lettered", job.id)));
        }
        Ok(())
    }

    async fn count_by_state(&self, queue: &str, state: JobState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ? AND state = ?")
            .bind(queue)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn release_expired_leases(&self, queue: &str, now_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'PENDING', run_at = ?, started_at = NULL,
                lease_expires_at = NULL, last_error = ?
            WHERE queue = ? AND state = 'IN_PROGRESS' AND lease_expires_at <= ?
              AND attempts_made < max_attempts
            "#,
        )
        .bind(now_millis)
        .bind(LEASE_EXPIRED_ERROR)
        .bind(queue)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let released = result.rows_affected();
        if released > 0 {
            info!(queue = %queue, released = released, "Expired leases released");
        }
        Ok(released)
    }

    async fn find_expired_exhausted(&self, queue: &str, now_millis: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE queue = ? AND state = 'IN_PROGRESS' AND lease_expires_at <= ?
              AND attempts_made >= max_attempts
            ORDER BY seq ASC
            "#,
        )
        .bind(queue)
        .bind(now_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    state: String,
    priority: i32,
    attempts_made: i64,
    max_attempts: i64,
    backoff: String,
    timeout_ms: Option<i64>,
    created_at: i64,
    run_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    lease_expires_at: Option<i64>,
    last_error: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let state = JobState::parse(&self.state)
            .ok_or_else(|| AppError::Database(format!("job {} has unknown state {}", self.id, self.state)))?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let backoff: Backoff = serde_json::from_str(&self.backoff)?;

        let mut job = Job::new(
            self.id,
            self.created_at,
            self.queue,
            JobName::new(self.name),
            JobPayload::new(payload),
            to_u32("max_attempts", self.max_attempts)?,
            backoff,
        );
        job.state = state;
        job.priority = self.priority;
        job.attempts_made = to_u32("attempts_made", self.attempts_made)?;
        job.timeout_ms = self.timeout_ms.map(|t| to_u64("timeout_ms", t)).transpose()?;
        job.run_at = self.run_at;
        job.started_at = self.started_at;
        job.finished_at = self.finished_at;
        job.lease_expires_at = self.lease_expires_at;
        job.last_error = self.last_error;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::json;

    async fn repo() -> SqliteJobRepository {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobRepository::new(pool)
    }

    fn job(id: &str, priority: i32, run_at: i64) -> Job {
        let mut job = Job::new_test("emails", "send_receipt", json!({"order": id}));
        job.id = id.to_string();
        job.priority = priority;
        job.run_at = run_at;
        job
    }

    #[tokio::test]
    async fn test_insert_and_find_round_trip() {
        let repo = repo().await;
        let mut original = job("a", 3, 100);
        original.backoff = Backoff::Fixed { delay_ms: 750 };
        original.timeout_ms = Some(5_000);
        repo.insert(&original).await.unwrap();

        let found = repo.find_by_id(&"a".to_string()).await.unwrap().unwrap();
        assert_eq!(found, original);
        assert!(repo.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_a_conflict() {
        let repo = repo().await;
        repo.insert(&job("a", 0, 0)).await.unwrap();
        assert!(matches!(repo.insert(&job("a", 0, 0)).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_claim_order_and_due_time() {
        let repo = repo().await;
        repo.insert(&job("later", 0, 500)).await.unwrap();
        repo.insert(&job("first", 0, 10)).await.unwrap();
        repo.insert(&job("second", 0, 10)).await.unwrap();
        repo.insert(&job("urgent", 9, 90)).await.unwrap();

        let mut order = Vec::new();
        while let Some(claimed) = repo.claim_next("emails", 100, 1_000).await.unwrap() {
            assert_eq!(claimed.state, JobState::InProgress);
            assert_eq!(claimed.attempts_made, 1);
            assert_eq!(claimed.lease_expires_at, Some(1_100));
            order.push(claimed.id);
        }
        assert_eq!(order, vec!["urgent", "first", "second"]);
        assert!(repo.claim_next("other", 1_000, 1_000).await.unwrap().is_none());
        assert_eq!(repo.claim_next("emails", 500, 1_000).await.unwrap().unwrap().id, "later");
    }

    #[tokio::test]
    async fn test_settle_retry_then_complete() {
        let repo = repo().await;
        repo.insert(&job("a", 0, 0)).await.unwrap();

        let mut claimed = repo.claim_next("emails", 0, 1_000).await.unwrap().unwrap();
        claimed.schedule_retry(10, 200, "smtp timeout").unwrap();
        repo.settle(&claimed).await.unwrap();
        assert!(repo.claim_next("emails", 209, 1_000).await.unwrap().is_none());

        let mut again = repo.claim_next("emails", 210, 1_000).await.unwrap().unwrap();
        assert_eq!(again.attempts_made, 2);
        assert_eq!(again.last_error.as_deref(), Some("smtp timeout"));

        again.complete(220).unwrap();
        repo.settle(&again).await.unwrap();
        assert_eq!(repo.count_by_state("emails", JobState::Completed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_owner_gets_conflict_after_lease_release() {
        let repo = repo().await;
        repo.insert(&job("a", 0, 0)).await.unwrap();

        let stale = repo.claim_next("emails", 0, 100).await.unwrap().unwrap();
        assert_eq!(repo.release_expired_leases("emails", 99).await.unwrap(), 0);
        assert_eq!(repo.release_expired_leases("emails", 100).await.unwrap(), 1);

        let released = repo.find_by_id(&"a".to_string()).await.unwrap().unwrap();
        assert_eq!(released.state, JobState::Pending);
        assert_eq!(released.last_error.as_deref(), Some(LEASE_EXPIRED_ERROR));

        let fresh = repo.claim_next("emails", 100, 100).await.unwrap().unwrap();
        assert!(matches!(repo.remove_claimed(&stale).await, Err(AppError::Conflict(_))));
        repo.remove_claimed(&fresh).await.unwrap();
        assert!(repo.find_by_id(&"a".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_without_attempts_left_is_not_released() {
        let repo = repo().await;
        let mut last_try = job("last", 5, 0);
        last_try.max_attempts = 1;
        repo.insert(&last_try).await.unwrap();
        repo.insert(&job("retryable", 0, 0)).await.unwrap();

        repo.claim_next("emails", 0, 100).await.unwrap().unwrap();
        repo.claim_next("emails", 0, 100).await.unwrap().unwrap();
        assert!(repo.find_expired_exhausted("emails", 99).await.unwrap().is_empty());

        assert_eq!(repo.release_expired_leases("emails", 100).await.unwrap(), 1);
        let exhausted = repo.find_expired_exhausted("emails", 100).await.unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].id, "last");
        assert_eq!(exhausted[0].attempts_made, 1);

        assert_eq!(repo.claim_next("emails", 100, 100).await.unwrap().unwrap().id, "retryable");
        assert!(repo.claim_next("emails", 100, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_lettered_row_is_removed_only_after_settle() {
        let repo = repo().await;
        repo.insert(&job("a", 0, 0)).await.unwrap();

        let mut claimed = repo.claim_next("emails", 0, 100).await.unwrap().unwrap();
        assert!(matches!(repo.remove_dead_lettered(&claimed).await, Err(AppError::Conflict(_))));

        claimed.mark_dead_lettered(10, "boom").unwrap();
        repo.settle(&claimed).await.unwrap();
        assert_eq!(repo.count_by_state("emails", JobState::DeadLettered).await.unwrap(), 1);
        repo.remove_dead_lettered(&claimed).await.unwrap();
        assert!(repo.find_by_id(&"a".to_string()).await.unwrap().is_none());
    }
}
