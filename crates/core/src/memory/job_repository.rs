// In-memory JobRepository

use crate::domain::{Job, JobId, JobState};
use crate::error::{AppError, Result};
use crate::port::JobRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

struct Stored {
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Stored>,
    next_seq: u64,
}

/// Mutex-guarded job table. Claim atomicity comes from the single lock; no
/// handler ever runs while it is held.
#[derive(Default)]
pub struct InMemoryJobRepository {
    inner: Mutex<Inner>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every stored job in insertion order
    pub fn jobs(&self) -> Vec<Job> {
        let inner = self.lock();
        let mut stored: Vec<&Stored> = inner.jobs.values().collect();
        stored.sort_by_key(|s| s.seq);
        stored.into_iter().map(|s| s.job.clone()).collect()
    }
}

/// Ownership fence: the stored row must still be the claim `job` came from
fn check_owned(stored: Option<&Stored>, job: &Job) -> Result<()> {
    match stored {
        Some(s) if s.job.state == JobState::InProgress && s.job.attempts_made == job.attempts_made => Ok(()),
        Some(s) => Err(AppError::Conflict(format!(
            "job {} no longer owned by attempt {} (state {}, attempt {})",
            job.id, job.attempts_made, s.job.state, s.job.attempts_made
        ))),
        None => Err(AppError::Conflict(format!("job {} no longer exists", job.id))),
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("job {} already exists", job.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(job.id.clone(), Stored { seq, job: job.clone() });
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock().jobs.get(id).map(|s| s.job.clone()))
    }

    async fn claim_next(&self, queue: &str, now_millis: i64, lease_ms: u64) -> Result<Option<Job>> {
        let mut inner = self.lock();

        // Highest priority first, then earliest run_at, then insertion order
        let next_id = inner
            .jobs
            .values()
            .filter(|s| s.job.queue == queue && s.job.is_due(now_millis))
            .min_by_key(|s| (std::cmp::Reverse(s.job.priority), s.job.run_at, s.seq))
            .map(|s| s.job.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(stored) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        stored.job.claim(now_millis, lease_ms)?;

        debug!(job_id = %id, attempt = stored.job.attempts_made, "Job claimed");
        Ok(Some(stored.job.clone()))
    }

    async fn settle(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock();
        check_owned(inner.jobs.get(&job.id), job)?;
        if let Some(stored) = inner.jobs.get_mut(&job.id) {
            stored.job = job.clone();
        }
        Ok(())
    }

    async fn remove_claimed(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock();
        check_owned(inner.jobs.get(&job.id), job)?;
        inner.jobs.remove(&job.id);
        Ok(())
    }

    async fn remove_dead_lettered(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock();
        match inner.jobs.get(&job.id) {
            Some(s) if s.job.state == JobState::DeadLettered => {
                inner.jobs.remove(&job.id);
                Ok(())
            }
            _ => Err(AppError::Conflict(format!("job {} is not dead-lettered", job.id))),
        }
    }

    async fn count_by_state(&self, queue: &str, state: JobState) -> Result<i64> {
        let count = self
            .lock()
            .jobs
            .values()
            .filter(|s| s.job.queue == queue && s.job.state == state)
            .count();
        Ok(count as i64)
    }

    async fn release_expired_leases(&self, queue: &str, now_millis: i64) -> Result<u64> {
        let mut inner = self.lock();
        let mut released = 0u64;
        for stored in inner.jobs.values_mut() {
            if stored.job.queue != queue || stored.job.state != JobState::InProgress {
                continue;
            }
            if stored.job.release_expired_lease(now_millis)? {
                info!(job_id = %stored.job.id, attempts_made = stored.job.attempts_made, "Expired lease released");
                released += 1;
            }
        }
        Ok(released)
    }

    async fn find_expired_exhausted(&self, queue: &str, now_millis: i64) -> Result<Vec<Job>> {
        let inner = self.lock();
        let mut stored: Vec<&Stored> = inner
            .jobs
            .values()
            .filter(|s| s.job.queue == queue && s.job.lease_expired(now_millis) && !s.job.has_attempts_remaining())
            .collect();
        stored.sort_by_key(|s| s.seq);
        Ok(stored.into_iter().map(|s| s.job.clone()).collect())
    }
}
