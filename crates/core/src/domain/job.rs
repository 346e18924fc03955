// Job Domain Model

use crate::domain::backoff::Backoff;
use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority (higher number = claimed first)
pub type Priority = i32;

/// `last_error` of a job returned to PENDING by lease recovery
pub const LEASE_EXPIRED_ERROR: &str = "lease expired before the job was settled";

/// Job State
///
/// ```text
/// PENDING -> IN_PROGRESS -> { COMPLETED | PENDING (retry) | DEAD_LETTERED }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    DeadLettered,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Completed => "COMPLETED",
            JobState::DeadLettered => "DEAD_LETTERED",
        }
    }

    /// Parse the stored representation produced by `as_str`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobState::Pending),
            "IN_PROGRESS" => Some(JobState::InProgress),
            "COMPLETED" => Some(JobState::Completed),
            "DEAD_LETTERED" => Some(JobState::DeadLettered),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::DeadLettered)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job name (what kind of work the payload describes, e.g. "send_receipt")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobName(String);

impl JobName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Payload (JSON serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    // Identity
    pub id: JobId,
    pub queue: String,
    pub name: JobName,
    pub payload: JobPayload,

    pub state: JobState,
    pub priority: Priority,

    // Execution policy
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub timeout_ms: Option<u64>,

    // Timestamps (epoch ms)
    pub created_at: i64,
    pub run_at: i64, // not claimable before this instant
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub lease_expires_at: Option<i64>,

    pub last_error: Option<String>,
}

impl Job {
    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    ///
    /// **Note**: only for tests. Production code injects ID and time via providers.
    pub fn new_test(queue: impl Into<String>, name: impl Into<String>, payload: serde_json::Value) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(
            id,
            created_at,
            queue,
            JobName::new(name),
            JobPayload::new(payload),
            3,
            Backoff::default(),
        )
    }

    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue` - Origin queue name
    /// * `name` - Job name
    /// * `payload` - Job payload
    /// * `max_attempts` - Total execution attempts allowed
    /// * `backoff` - Delay strategy between attempts
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue: impl Into<String>,
        name: JobName,
        payload: JobPayload,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            name,
            payload,
            state: JobState::Pending,
            priority: 0,
            attempts_made: 0,
            max_attempts,
            backoff,
            timeout_ms: None,
            created_at,
            run_at: created_at,
            started_at: None,
            finished_at: None,
            lease_expires_at: None,
            last_error: None,
        }
    }

    fn transition_error(&self, to: JobState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether a pending job may be claimed at `now_millis`
    pub fn is_due(&self, now_millis: i64) -> bool {
        self.state == JobState::Pending && self.run_at <= now_millis
    }

    /// PENDING -> IN_PROGRESS. Counts as an execution attempt.
    pub fn claim(&mut self, now_millis: i64, lease_ms: u64) -> Result<()> {
        if self.state != JobState::Pending {
            return Err(self.transition_error(JobState::InProgress));
        }
        self.state = JobState::InProgress;
        self.attempts_made += 1;
        self.started_at = Some(now_millis);
        self.lease_expires_at = Some(now_millis.saturating_add(lease_ms as i64));
        Ok(())
    }

    /// IN_PROGRESS -> COMPLETED
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.state != JobState::InProgress {
            return Err(self.transition_error(JobState::Completed));
        }
        self.state = JobState::Completed;
        self.finished_at = Some(now_millis);
        self.lease_expires_at = None;
        Ok(())
    }

    /// IN_PROGRESS -> PENDING, eligible again after `delay_ms`
    pub fn schedule_retry(&mut self, now_millis: i64, delay_ms: u64, error: impl Into<String>) -> Result<()> {
        if self.state != JobState::InProgress {
            return Err(self.transition_error(JobState::Pending));
        }
        self.state = JobState::Pending;
        self.run_at = now_millis.saturating_add(delay_ms as i64);
        self.started_at = None;
        self.lease_expires_at = None;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// IN_PROGRESS -> DEAD_LETTERED
    pub fn mark_dead_lettered(&mut self, now_millis: i64, error: impl Into<String>) -> Result<()> {
        if self.state != JobState::InProgress {
            return Err(self.transition_error(JobState::DeadLettered));
        }
        self.state = JobState::DeadLettered;
        self.finished_at = Some(now_millis);
        self.lease_expires_at = None;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Whether this job is IN_PROGRESS with a lease that ran out at or before `now_millis`
    pub fn lease_expired(&self, now_millis: i64) -> bool {
        self.state == JobState::InProgress && matches!(self.lease_expires_at, Some(expires_at) if expires_at <= now_millis)
    }

    /// Return an IN_PROGRESS job whose lease expired to PENDING.
    ///
    /// The attempt already spent by the lost worker stays counted. A job with
    /// no attempts left is not released (`Ok(false)`): it must be dead-lettered.
    pub fn release_expired_lease(&mut self, now_millis: i64) -> Result<bool> {
        if self.state != JobState::InProgress {
            return Err(self.transition_error(JobState::Pending));
        }
        if !self.lease_expired(now_millis) || !self.has_attempts_remaining() {
            return Ok(false);
        }
        self.state = JobState::Pending;
        self.run_at = now_millis;
        self.started_at = None;
        self.lease_expires_at = None;
        self.last_error = Some(LEASE_EXPIRED_ERROR.to_string());
        Ok(true)
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}
