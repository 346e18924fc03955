// Job Handler Port - the work a Worker runs for each claimed job

use crate::domain::Job;
use crate::resilience::{CallError, DependencyError, ErrorClass};
use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

/// Why a handler invocation failed.
///
/// Only `Permanent` skips the remaining attempt budget; every other variant is
/// retried while attempts remain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("handler timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn transient(message: impl Into<String>) -> Self {
        JobError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        JobError::Permanent(message.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::Permanent(_))
    }
}

impl From<DependencyError> for JobError {
    fn from(err: DependencyError) -> Self {
        match err.error_class() {
            ErrorClass::Permanent => JobError::Permanent(err.to_string()),
            ErrorClass::Transient => JobError::Transient(err.to_string()),
        }
    }
}

/// An open circuit is a reason to come back later, not to give up on the job
impl From<CallError<DependencyError>> for JobError {
    fn from(err: CallError<DependencyError>) -> Self {
        match err {
            CallError::Open(open) => JobError::Transient(open.to_string()),
            CallError::Operation(inner) => inner.into(),
        }
    }
}

/// Executes one claimed job.
///
/// Invoked at least once per job; handlers must tolerate redelivery.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure taking an owned `Job` as a `JobHandler`
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (self.f)(job.clone()).await
    }
}
