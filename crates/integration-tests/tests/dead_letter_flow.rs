//! Worker, SQLite queue, and SQLite dead letter sink end to end

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use steadfast_core::application::{EnqueueOptions, JobOutcome, JobQueue, Worker, WorkerStats};
use steadfast_core::domain::{Backoff, DeadLetterRecord, Job, JobState, QueueConfig};
use steadfast_core::port::id_provider::UuidProvider;
use steadfast_core::port::time_provider::SystemTimeProvider;
use steadfast_core::port::{handler_fn, DeadLetterSink, JobError, JobHandler, JobRepository};
use steadfast_infra_sqlite::{create_pool, run_migrations, SqliteDeadLetterSink, SqliteJobRepository};

struct Harness {
    path: PathBuf,
    repo: Arc<SqliteJobRepository>,
    sink: Arc<SqliteDeadLetterSink>,
    queue: Arc<JobQueue>,
    stats: Arc<WorkerStats>,
}

impl Harness {
    async fn new(config: QueueConfig) -> Self {
        let path = std::env::temp_dir().join(format!("steadfast-dlq-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&format!("sqlite://{}", path.display()), 2).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
        let sink = Arc::new(SqliteDeadLetterSink::new(pool));
        let queue = Arc::new(
            JobQueue::new(config, repo.clone(), Arc::new(UuidProvider), Arc::new(SystemTimeProvider)).unwrap(),
        );
        Self {
            path,
            repo,
            sink,
            queue,
            stats: Arc::new(WorkerStats::new()),
        }
    }

    fn worker(&self, handler: Arc<dyn JobHandler>) -> Worker {
        Worker::new("it-0", self.queue.clone(), handler, self.sink.clone(), self.stats.clone())
    }

    /// Process until the queue yields something other than a retry or idle poll
    async fn drive(&self, worker: &Worker) -> JobOutcome {
        for _ in 0..200 {
            match worker.process_next_job().await.unwrap() {
                JobOutcome::Idle | JobOutcome::Retrying { .. } => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                outcome => return outcome,
            }
        }
        panic!("queue never settled");
    }

    async fn records(&self) -> Vec<DeadLetterRecord> {
        let mut records = Vec::new();
        self.sink
            .for_each(&mut |r: &DeadLetterRecord| records.push(r.clone()))
            .await
            .unwrap();
        records
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn config() -> QueueConfig {
    QueueConfig::new("payments")
        .with_backoff(Backoff::Fixed { delay_ms: 1 })
        .with_job_timeout_ms(2_000)
}

/// A job failing every attempt yields exactly one durable record and leaves the queue
#[tokio::test]
async fn test_exhausted_job_lands_in_sqlite_sink_once() {
    let h = Harness::new(config().with_max_attempts(3)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let handler_calls = calls.clone();
    let worker = h.worker(Arc::new(handler_fn(move |_job| {
        let calls = handler_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(JobError::transient("gateway 503"))
        }
    })));

    let id = h.queue.enqueue("capture", json!({"amount": 1200}), None).await.unwrap();
    assert_eq!(h.drive(&worker).await, JobOutcome::DeadLettered(id.clone()));

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_queue, "payments");
    assert_eq!(records[0].original_job_id, id);
    assert_eq!(records[0].job_name, "capture");
    assert_eq!(records[0].attempts_made, 3);
    assert_eq!(records[0].failure_reason, "gateway 503");
    assert_eq!(records[0].payload.as_value(), &json!({"amount": 1200}));

    assert!(h.repo.find_by_id(&id).await.unwrap().is_none());
    assert_eq!(h.stats.snapshot().retried, 2);
    assert_eq!(h.stats.snapshot().dead_lettered, 1);
}

/// A dead letter replayed onto its queue runs again as a new job
#[tokio::test]
async fn test_replayed_dead_letter_completes() {
    let h = Harness::new(config().with_max_attempts(1).with_remove_on_complete(false)).await;
    let failing = h.worker(Arc::new(handler_fn(|_job| async { Err(JobError::permanent("card declined")) })));
    let id = h.queue.enqueue("capture", json!({"amount": 50}), None).await.unwrap();
    assert_eq!(h.drive(&failing).await, JobOutcome::DeadLettered(id.clone()));

    let record = h.records().await.remove(0);
    assert_eq!(record.failure_reason, "permanent failure: card declined");

    let replayed = h.queue.replay(&record).await.unwrap();
    assert_ne!(replayed, id);

    let succeeding = h.worker(Arc::new(handler_fn(|job: Job| async move {
        if job.payload.as_value()["amount"] == json!(50) {
            Ok(())
        } else {
            Err(JobError::permanent("unexpected payload"))
        }
    })));
    assert_eq!(h.drive(&succeeding).await, JobOutcome::Completed(replayed.clone()));
    assert_eq!(h.queue.count(JobState::Completed).await.unwrap(), 1);
    assert_eq!(h.sink.count().await.unwrap(), 1);
}

/// Per-job options override the queue defaults all the way to the dead letter
#[tokio::test]
async fn test_job_options_override_queue_defaults() {
    let h = Harness::new(config().with_max_attempts(5)).await;
    let worker = h.worker(Arc::new(handler_fn(|_job| async { Err(JobError::transient("still down")) })));

    let id = h
        .queue
        .enqueue(
            "capture",
            json!({}),
            Some(EnqueueOptions::default().with_max_attempts(2).with_priority(10)),
        )
        .await
        .unwrap();
    assert_eq!(h.drive(&worker).await, JobOutcome::DeadLettered(id));
    assert_eq!(h.records().await[0].attempts_made, 2);
}
