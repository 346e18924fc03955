// Job retry decisions
use crate::domain::{DeadLetterRecord, Job, JobId};
use crate::port::JobError;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound on the delay between two attempts of a job (1 hour)
pub const MAX_JOB_BACKOFF_MS: u64 = 60 * 60 * 1000;

/// A job's attempt budget is spent, or its failure is permanent.
///
/// Never returned to the enqueuer: the worker turns it into a `DeadLetterRecord`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job {job_id} exhausted after {attempts_made} attempt(s): {reason}")]
pub struct JobExhausted {
    pub job_id: JobId,
    pub attempts_made: u32,
    pub reason: String,
}

impl JobExhausted {
    pub fn into_record(self, job: &Job, failed_at: i64) -> DeadLetterRecord {
        DeadLetterRecord::from_job(job, self.reason, failed_at)
    }
}

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to PENDING after this many milliseconds
    Retry(u64),
    /// Forward to the dead letter sink
    Exhausted(JobExhausted),
}

/// Decide what happens to a claimed job whose handler failed.
///
/// `attempts_made` already counts the failed attempt, so the first retry uses
/// backoff attempt 0: `delay * 2^(attempts_made - 1)` for exponential backoff.
pub fn decide(job: &Job, error: &JobError) -> RetryDecision {
    if error.is_permanent() || !job.has_attempts_remaining() {
        warn!(
            job_id = %job.id,
            attempts_made = job.attempts_made,
            max_attempts = job.max_attempts,
            permanent = error.is_permanent(),
            error = %error,
            "Job exhausted"
        );
        return RetryDecision::Exhausted(JobExhausted {
            job_id: job.id.clone(),
            attempts_made: job.attempts_made,
            reason: error.to_string(),
        });
    }

    let delay_ms = job
        .backoff
        .jittered_delay_ms(job.attempts_made.saturating_sub(1), MAX_JOB_BACKOFF_MS);

    info!(
        job_id = %job.id,
        attempt = job.attempts_made,
        max_attempts = job.max_attempts,
        delay_ms = delay_ms,
        "Scheduling retry"
    );
    RetryDecision::Retry(delay_ms)
}
