//! SQLite-backed queue behavior across several pool connections

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use steadfast_core::application::{EnqueueOptions, JobQueue, RecoveryReport, RecoveryService};
use steadfast_core::domain::{DeadLetterRecord, JobState, QueueConfig, LEASE_EXPIRED_ERROR};
use steadfast_core::port::id_provider::UuidProvider;
use steadfast_core::port::time_provider::mocks::ManualClock;
use steadfast_core::port::time_provider::SystemTimeProvider;
use steadfast_core::port::{DeadLetterSink, JobRepository, TimeProvider};
use steadfast_core::AppError;
use steadfast_infra_sqlite::{create_pool, run_migrations, SqliteDeadLetterSink, SqliteJobRepository};

fn temp_db() -> PathBuf {
    std::env::temp_dir().join(format!("steadfast-it-{}.db", uuid::Uuid::new_v4()))
}

async fn open(path: &PathBuf, connections: u32) -> Arc<SqliteJobRepository> {
    let pool = create_pool(&format!("sqlite://{}", path.display()), connections)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(SqliteJobRepository::new(pool))
}

fn queue(repo: Arc<SqliteJobRepository>, config: QueueConfig, time: Arc<dyn TimeProvider>) -> JobQueue {
    JobQueue::new(config, repo, Arc::new(UuidProvider), time).unwrap()
}

/// Every due job is claimed exactly once, even with claims racing on several connections
#[tokio::test]
async fn test_concurrent_claims_never_share_a_job() {
    let path = temp_db();
    let repo = open(&path, 4).await;
    let emails = queue(repo.clone(), QueueConfig::new("emails"), Arc::new(SystemTimeProvider));

    let mut enqueued = HashSet::new();
    for i in 0..40 {
        enqueued.insert(emails.enqueue("send_receipt", json!({ "order": i }), None).await.unwrap());
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let now = SystemTimeProvider.now_millis();
                match repo.claim_next("emails", now, 60_000).await.unwrap() {
                    Some(job) => claimed.push(job.id),
                    None => break,
                }
            }
            claimed
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), 40, "each job claimed once");
    assert_eq!(unique, enqueued);
    assert_eq!(emails.count(JobState::InProgress).await.unwrap(), 40);

    let _ = std::fs::remove_file(&path);
}

/// Pending jobs survive a restart of the process that enqueued them
#[tokio::test]
async fn test_jobs_survive_reopen() {
    let path = temp_db();
    let id = {
        let repo = open(&path, 2).await;
        let emails = queue(repo, QueueConfig::new("emails"), Arc::new(SystemTimeProvider));
        emails
            .enqueue(
                "send_receipt",
                json!({"to": "a@example.com"}),
                Some(EnqueueOptions::default().with_priority(7).with_max_attempts(4)),
            )
            .await
            .unwrap()
    };

    let repo = open(&path, 2).await;
    let job = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.priority, 7);
    assert_eq!(job.max_attempts, 4);
    assert_eq!(job.payload.as_value(), &json!({"to": "a@example.com"}));

    let _ = std::fs::remove_file(&path);
}

/// A claim whose lease lapsed goes back to PENDING, and the old owner can no longer settle it
#[tokio::test]
async fn test_expired_lease_is_redelivered_and_fenced() {
    let path = temp_db();
    let repo = open(&path, 2).await;
    let clock = Arc::new(ManualClock::new(1_000_000));
    let config = QueueConfig::new("video").with_job_timeout_ms(1_000).with_lease_ms(5_000);
    let video = queue(repo.clone(), config, clock.clone());

    let id = video.enqueue("transcode", json!({"file": "intro.mp4"}), None).await.unwrap();
    let mut first = repo.claim_next("video", clock.now_millis(), 5_000).await.unwrap().unwrap();
    assert_eq!(first.id, id);
    assert_eq!(first.attempts_made, 1);

    clock.advance(4_999);
    assert_eq!(video.release_expired_leases().await.unwrap(), 0);
    clock.advance(2);
    assert_eq!(video.release_expired_leases().await.unwrap(), 1);

    let second = repo.claim_next("video", clock.now_millis(), 5_000).await.unwrap().unwrap();
    assert_eq!(second.id, id);
    assert_eq!(second.attempts_made, 2);

    // The first owner finishes late
    first.complete(clock.now_millis()).unwrap();
    assert!(matches!(repo.settle(&first).await, Err(AppError::Conflict(_))));

    let stored = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::InProgress);
    assert_eq!(stored.attempts_made, 2);

    let _ = std::fs::remove_file(&path);
}

/// A lease that lapses on the last allowed attempt ends in the dead letter table, not back in the queue
#[tokio::test]
async fn test_expired_last_attempt_is_dead_lettered_by_reaper() {
    let path = temp_db();
    let pool = create_pool(&format!("sqlite://{}", path.display()), 2).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
    let sink = Arc::new(SqliteDeadLetterSink::new(pool));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let config = QueueConfig::new("video")
        .with_max_attempts(1)
        .with_job_timeout_ms(1_000)
        .with_lease_ms(5_000);
    let video = Arc::new(queue(repo.clone(), config, clock.clone()));

    let id = video.enqueue("transcode", json!({"file": "intro.mp4"}), None).await.unwrap();
    repo.claim_next("video", clock.now_millis(), 5_000).await.unwrap().unwrap();

    let reaper = RecoveryService::new(vec![video.clone()], sink.clone());
    clock.advance(5_000);
    let report = reaper.sweep().await.unwrap();
    assert_eq!(report, RecoveryReport { released: 0, dead_lettered: 1 });

    let mut records = Vec::new();
    let mut collect = |r: &DeadLetterRecord| records.push(r.clone());
    sink.for_each(&mut collect).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_job_id, id);
    assert_eq!(records[0].attempts_made, 1);
    assert_eq!(records[0].failure_reason, LEASE_EXPIRED_ERROR);

    assert!(repo.find_by_id(&id).await.unwrap().is_none());
    assert!(repo.claim_next("video", clock.now_millis(), 5_000).await.unwrap().is_none());

    let _ = std::fs::remove_file(&path);
}
