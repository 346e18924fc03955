// Job handler routing by job name

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use steadfast_core::domain::Job;
use steadfast_core::port::{JobError, JobHandler};
use tracing::info;

/// Routes each job to the handler registered for its name.
///
/// A job with no registered handler fails permanently: retrying cannot help.
#[derive(Default, Clone)]
pub struct JobDispatcher {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher preloaded with the built-in `noop` and `log` handlers
    pub fn with_builtins() -> Self {
        Self::new().register("noop", NoopHandler).register("log", LogHandler)
    }

    pub fn register(mut self, job_name: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(job_name.into(), Arc::new(handler));
        self
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl JobHandler for JobDispatcher {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        match self.handlers.get(job.name.as_str()) {
            Some(handler) => handler.handle(job).await,
            None => Err(JobError::permanent(format!("no handler registered for job {}", job.name))),
        }
    }
}

/// Completes immediately
pub struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        Ok(())
    }
}

/// Logs the payload and completes
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        info!(job_id = %job.id, queue = %job.queue, payload = %job.payload.as_value(), "log job");
        Ok(())
    }
}
