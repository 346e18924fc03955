// Job Repository Port (Interface)

use crate::domain::{Job, JobId, JobState};
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage behind a JobQueue.
///
/// Ownership of a claimed job is fenced by `(state = IN_PROGRESS, attempts_made)`:
/// `settle` and `remove_claimed` fail with `AppError::Conflict` once the lease was
/// lost (released by the reaper or re-claimed by another worker).
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically claim the next due job of `queue` (priority, then run_at, then FIFO).
    ///
    /// The returned job is IN_PROGRESS with `attempts_made` incremented and a
    /// lease expiring at `now_millis + lease_ms`. No two callers get the same claim.
    async fn claim_next(&self, queue: &str, now_millis: i64, lease_ms: u64) -> Result<Option<Job>>;

    /// Persist the new state of a job this caller claimed
    async fn settle(&self, job: &Job) -> Result<()>;

    /// Delete a job this caller claimed from its queue
    async fn remove_claimed(&self, job: &Job) -> Result<()>;

    /// Delete a job settled as DEAD_LETTERED once its record reached the sink
    async fn remove_dead_lettered(&self, job: &Job) -> Result<()>;

    /// Count jobs by state
    async fn count_by_state(&self, queue: &str, state: JobState) -> Result<i64>;

    /// Return IN_PROGRESS jobs whose lease expired to PENDING; returns how many.
    ///
    /// Jobs that already spent `max_attempts` are left IN_PROGRESS for
    /// `find_expired_exhausted`.
    async fn release_expired_leases(&self, queue: &str, now_millis: i64) -> Result<u64>;

    /// IN_PROGRESS jobs whose lease expired with no attempts left
    async fn find_expired_exhausted(&self, queue: &str, now_millis: i64) -> Result<Vec<Job>>;
}
