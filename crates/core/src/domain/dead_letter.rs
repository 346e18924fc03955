// Dead Letter Record

use crate::domain::job::{Job, JobId, JobPayload};
use serde::{Deserialize, Serialize};

/// A job that exhausted its attempt budget (or failed permanently).
///
/// Append-only and write-once: sinks never mutate a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_queue: String,
    pub original_job_id: JobId,
    pub job_name: String,
    pub payload: JobPayload,
    pub failure_reason: String,
    pub attempts_made: u32,
    pub failed_at: i64, // epoch ms
}

impl DeadLetterRecord {
    pub fn from_job(job: &Job, failure_reason: impl Into<String>, failed_at: i64) -> Self {
        Self {
            original_queue: job.queue.clone(),
            original_job_id: job.id.clone(),
            job_name: job.name.as_str().to_string(),
            payload: job.payload.clone(),
            failure_reason: failure_reason.into(),
            attempts_made: job.attempts_made,
            failed_at,
        }
    }
}
