// Enqueue Use Case

use crate::domain::queue::validate_name;
use crate::domain::{Backoff, Job, JobId, JobName, JobPayload, Priority, QueueConfig};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRepository, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Accepted priority range (higher is claimed first)
pub const MIN_PRIORITY: Priority = -100;
pub const MAX_PRIORITY: Priority = 100;

/// Maximum JSON nesting depth of a payload
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Per-job overrides of the queue defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueOptions {
    pub max_attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    pub priority: Priority,
    /// Not claimable before `now + delay_ms`
    pub delay_ms: u64,
    pub timeout_ms: Option<u64>,
}

impl EnqueueOptions {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Enqueue request after defaults were resolved
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub name: String,
    pub payload: serde_json::Value,
    pub options: EnqueueOptions,
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(fields) => 1 + fields.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Validate a request against the queue it targets
pub fn validate_request(config: &QueueConfig, req: &EnqueueRequest) -> Result<()> {
    validate_name("job", &req.name)?;

    if let Some(0) = req.options.max_attempts {
        return Err(AppError::Validation("max_attempts must be >= 1".to_string()));
    }
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&req.options.priority) {
        return Err(AppError::Validation(format!(
            "priority {} out of range [{}, {}]",
            req.options.priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    if let Some(timeout_ms) = req.options.timeout_ms {
        if timeout_ms == 0 || timeout_ms >= config.lease_ms {
            return Err(AppError::Validation(format!(
                "timeout_ms must be in 1..{} (the queue lease)",
                config.lease_ms
            )));
        }
    }
    if req.options.delay_ms > i64::MAX as u64 {
        return Err(AppError::Validation("delay_ms out of range".to_string()));
    }
    if json_depth(&req.payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(())
}

/// Execute enqueue use case
///
/// # Arguments
///
/// * `config` - Target queue (supplies defaults)
/// * `job_repo` - Job repository
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `req` - Enqueue request
pub async fn execute(
    config: &QueueConfig,
    job_repo: &dyn JobRepository,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    req: EnqueueRequest,
) -> Result<JobId> {
    validate_request(config, &req)?;

    let job_id = id_provider.generate_id();
    let created_at = time_provider.now_millis();

    let mut job = Job::new(
        job_id.clone(),
        created_at,
        config.name.clone(),
        JobName::new(req.name),
        JobPayload::new(req.payload),
        req.options.max_attempts.unwrap_or(config.default_max_attempts),
        req.options.backoff.unwrap_or(config.default_backoff),
    );
    job.priority = req.options.priority;
    job.timeout_ms = req.options.timeout_ms;
    job.run_at = created_at.saturating_add(req.options.delay_ms as i64);

    job_repo.insert(&job).await?;

    info!(
        job_id = %job.id,
        queue = %job.queue,
        name = %job.name,
        max_attempts = job.max_attempts,
        run_at = job.run_at,
        "Job enqueued"
    );
    Ok(job_id)
}
