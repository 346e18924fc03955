// Queue Domain Model

use crate::domain::backoff::Backoff;
use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Queue identifier
pub type QueueId = String;

/// Maximum length of queue and job names
pub const MAX_NAME_LEN: usize = 64;

/// Validate a queue or job name: non-empty, at most 64 chars, `[A-Za-z0-9_.:-]`
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DomainError::ValidationError(format!("{} name must not be empty", kind)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DomainError::ValidationError(format!(
            "{} name too long ({} > {} chars)",
            kind,
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(DomainError::ValidationError(format!(
            "{} name must be alphanumeric (plus _ - . :): {}",
            kind, name
        )));
    }
    Ok(())
}

/// Per-queue execution policy, fixed at queue creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: QueueId,
    pub default_max_attempts: u32,
    pub default_backoff: Backoff,
    /// Handler invocations running longer than this count as failures
    pub job_timeout_ms: u64,
    /// How long a claim is owned before the job may be redelivered
    pub lease_ms: u64,
    /// Drop completed jobs instead of keeping them as COMPLETED
    pub remove_on_complete: bool,
    /// Workers spawned for this queue by the worker pool
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            default_max_attempts: 3,
            default_backoff: Backoff::default(),
            job_timeout_ms: 30_000,
            lease_ms: 5 * 60 * 1000,
            remove_on_complete: true,
            concurrency: 1,
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.default_backoff = backoff;
        self
    }

    pub fn with_job_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.job_timeout_ms = timeout_ms;
        self
    }

    pub fn with_lease_ms(mut self, lease_ms: u64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    pub fn with_remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = remove;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Checks names, budgets, and that the lease outlives the handler timeout
    pub fn validate(&self) -> Result<()> {
        validate_name("queue", &self.name)?;
        if self.default_max_attempts == 0 {
            return Err(DomainError::ValidationError(format!(
                "queue {}: default_max_attempts must be >= 1",
                self.name
            )));
        }
        if self.job_timeout_ms == 0 {
            return Err(DomainError::ValidationError(format!(
                "queue {}: job_timeout_ms must be > 0",
                self.name
            )));
        }
        if self.lease_ms <= self.job_timeout_ms {
            return Err(DomainError::ValidationError(format!(
                "queue {}: lease_ms ({}) must exceed job_timeout_ms ({})",
                self.name, self.lease_ms, self.job_timeout_ms
            )));
        }
        if self.concurrency == 0 {
            return Err(DomainError::ValidationError(format!(
                "queue {}: concurrency must be >= 1",
                self.name
            )));
        }
        Ok(())
    }
}
