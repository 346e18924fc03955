// Dead-lettering - move a claimed job from its queue into the sink

use crate::domain::{DeadLetterRecord, Job};
use crate::error::Result;
use crate::port::{DeadLetterSink, JobRepository};
use tracing::{error, warn};

/// Where a dead-lettered job ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    /// The sink holds the record and the queue row is gone
    Recorded,
    /// The sink rejected the record; the row stays in the queue as DEAD_LETTERED
    KeptInQueue,
}

/// Dead-letter a job the caller still owns.
///
/// The job is settled as DEAD_LETTERED first, fenced like any other settle, so
/// a caller whose lease lapsed gets `AppError::Conflict` and nothing reaches the
/// sink. Only then is the record written and the row deleted. A DEAD_LETTERED
/// row is never released by the reaper, so the job cannot run again meanwhile.
pub async fn forward(
    repo: &dyn JobRepository,
    sink: &dyn DeadLetterSink,
    job: &mut Job,
    record: &DeadLetterRecord,
) -> Result<Forwarded> {
    job.mark_dead_lettered(record.failed_at, record.failure_reason.clone())?;
    repo.settle(job).await?;

    if let Err(sink_err) = sink.record(record.clone()).await {
        error!(
            target: "dead_letter",
            queue = %record.original_queue,
            job_id = %record.original_job_id,
            job_name = %record.job_name,
            attempts_made = record.attempts_made,
            failed_at = record.failed_at,
            failure_reason = %record.failure_reason,
            payload = %record.payload.as_value(),
            error = %sink_err,
            "Dead letter sink failed, job kept as DEAD_LETTERED"
        );
        return Ok(Forwarded::KeptInQueue);
    }

    // The record is durable; a leftover DEAD_LETTERED row is inert
    if let Err(e) = repo.remove_dead_lettered(job).await {
        warn!(job_id = %job.id, error = %e, "Dead-lettered job not removed from queue");
    }
    Ok(Forwarded::Recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;
    use crate::error::AppError;
    use crate::memory::{InMemoryDeadLetterSink, InMemoryJobRepository};
    use crate::port::dead_letter_sink::mocks::FailingDeadLetterSink;
    use serde_json::json;

    async fn claimed(repo: &InMemoryJobRepository) -> Job {
        repo.insert(&Job::new_test("payments", "capture", json!({"amount": 1200})))
            .await
            .unwrap();
        repo.claim_next("payments", 0, 1_000).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_forward_records_then_removes_row() {
        let repo = InMemoryJobRepository::new();
        let sink = InMemoryDeadLetterSink::new();
        let mut job = claimed(&repo).await;
        let record = DeadLetterRecord::from_job(&job, "card declined", 500);

        let forwarded = tokio_test::assert_ok!(forward(&repo, &sink, &mut job, &record).await);
        assert_eq!(forwarded, Forwarded::Recorded);
        assert_eq!(sink.records(), vec![record]);
        assert!(repo.find_by_id(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forward_keeps_row_when_sink_is_down() {
        let repo = InMemoryJobRepository::new();
        let sink = FailingDeadLetterSink::new();
        let mut job = claimed(&repo).await;
        let record = DeadLetterRecord::from_job(&job, "card declined", 500);

        let forwarded = forward(&repo, &sink, &mut job, &record).await.unwrap();
        assert_eq!(forwarded, Forwarded::KeptInQueue);

        let kept = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(kept.state, JobState::DeadLettered);
        assert_eq!(kept.finished_at, Some(500));
        assert_eq!(repo.release_expired_leases("payments", 10_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forward_after_lost_lease_writes_nothing() {
        let repo = InMemoryJobRepository::new();
        let sink = InMemoryDeadLetterSink::new();
        let mut stale = claimed(&repo).await;
        repo.release_expired_leases("payments", 1_000).await.unwrap();
        let record = DeadLetterRecord::from_job(&stale, "card declined", 1_000);

        let err = forward(&repo, &sink, &mut stale, &record).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(sink.records().is_empty());
        assert_eq!(repo.count_by_state("payments", JobState::Pending).await.unwrap(), 1);
    }
}
