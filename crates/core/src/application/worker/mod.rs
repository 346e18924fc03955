// Worker - Job execution loop

pub mod constants;
mod pool;
mod shutdown;
mod stats;

use constants::*;
pub use pool::WorkerPool;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use stats::{WorkerStats, WorkerStatsSnapshot};

use crate::application::dead_letter::{self, Forwarded};
use crate::application::job_queue::JobQueue;
use crate::application::retry::{self, JobExhausted, RetryDecision};
use crate::domain::{Job, JobId};
use crate::error::{AppError, Result};
use crate::port::{DeadLetterSink, JobError, JobHandler};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// What one `process_next_job` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing due in the queue
    Idle,
    Completed(JobId),
    Retrying { job_id: JobId, delay_ms: u64 },
    DeadLettered(JobId),
    /// The lease was lost before settling; the result was discarded
    Lost(JobId),
}

/// Drains one queue, one job at a time
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    sink: Arc<dyn DeadLetterSink>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        sink: Arc<dyn DeadLetterSink>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            handler,
            sink,
            stats,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(worker = %self.id, queue = %self.queue.name(), "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            let pause = match self.process_next_job().await {
                Ok(JobOutcome::Idle) => IDLE_SLEEP_DURATION,
                Ok(_) => continue,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "Worker error");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };
            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => break,
            }
        }
        info!(worker = %self.id, queue = %self.queue.name(), "Worker stopped");
        Ok(())
    }

    /// Claim the next due job, run its handler, and settle the result
    pub async fn process_next_job(&self) -> Result<JobOutcome> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(JobOutcome::Idle);
        };

        info!(
            worker = %self.id,
            job_id = %job.id,
            name = %job.name,
            attempt = job.attempts_made,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        let timeout_ms = job.timeout_ms.unwrap_or(self.queue.config().job_timeout_ms);
        let (job, result) = self.execute(job, timeout_ms).await;

        match result {
            Ok(()) => self.complete(job).await,
            Err(err) => self.fail(job, err).await,
        }
    }

    /// Run the handler in its own task so a panic cannot take the worker down
    async fn execute(&self, job: Job, timeout_ms: u64) -> (Job, std::result::Result<(), JobError>) {
        let job_arc = Arc::new(job);
        let job_for_exec = Arc::clone(&job_arc);
        let handler = Arc::clone(&self.handler);

        let handle = tokio::task::spawn(async move { handler.handle(&job_for_exec).await });
        let abort = handle.abort_handle();

        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) if join_err.is_panic() => Err(JobError::Panicked(panic_message(join_err.into_panic()))),
            Ok(Err(join_err)) => Err(JobError::transient(format!("handler task cancelled: {}", join_err))),
            Err(_) => {
                abort.abort();
                Err(JobError::TimedOut { timeout_ms })
            }
        };

        // The aborted task may still hold its clone for a moment
        let job = Arc::try_unwrap(job_arc).unwrap_or_else(|arc| (*arc).clone());
        (job, result)
    }

    async fn complete(&self, mut job: Job) -> Result<JobOutcome> {
        let repo = self.queue.repository();
        let settled = if self.queue.config().remove_on_complete {
            repo.remove_claimed(&job).await
        } else {
            job.complete(self.queue.now_millis())?;
            repo.settle(&job).await
        };

        let outcome = self.finish(settled, &job, JobOutcome::Completed(job.id.clone()))?;
        if matches!(outcome, JobOutcome::Completed(_)) {
            self.stats.record_completed();
            info!(worker = %self.id, job_id = %job.id, attempt = job.attempts_made, "Job completed");
        }
        Ok(outcome)
    }

    async fn fail(&self, mut job: Job, err: JobError) -> Result<JobOutcome> {
        match retry::decide(&job, &err) {
            RetryDecision::Retry(delay_ms) => {
                job.schedule_retry(self.queue.now_millis(), delay_ms, err.to_string())?;
                let settled = self.queue.repository().settle(&job).await;
                let outcome = self.finish(
                    settled,
                    &job,
                    JobOutcome::Retrying {
                        job_id: job.id.clone(),
                        delay_ms,
                    },
                )?;
                if matches!(outcome, JobOutcome::Retrying { .. }) {
                    self.stats.record_retried();
                }
                Ok(outcome)
            }
            RetryDecision::Exhausted(exhausted) => self.dead_letter(job, exhausted).await,
        }
    }

    /// Settle the job as DEAD_LETTERED, hand it to the sink, then drop it from the queue.
    ///
    /// If the sink rejects the record, the job stays in the queue as
    /// DEAD_LETTERED and the full record goes to the `dead_letter` log target.
    async fn dead_letter(&self, mut job: Job, exhausted: JobExhausted) -> Result<JobOutcome> {
        let record = exhausted.into_record(&job, self.queue.now_millis());
        let forwarded = dead_letter::forward(self.queue.repository(), self.sink.as_ref(), &mut job, &record).await;
        let settled = forwarded.map(|forwarded| {
            if forwarded == Forwarded::KeptInQueue {
                self.stats.record_sink_failure();
            }
        });

        let outcome = self.finish(settled, &job, JobOutcome::DeadLettered(job.id.clone()))?;
        if matches!(outcome, JobOutcome::DeadLettered(_)) {
            self.stats.record_dead_lettered();
            warn!(
                worker = %self.id,
                job_id = %job.id,
                attempts_made = record.attempts_made,
                reason = %record.failure_reason,
                "Job dead-lettered"
            );
        }
        Ok(outcome)
    }

    /// A lost lease is not a worker error: another worker owns the job now
    fn finish(&self, settled: Result<()>, job: &Job, outcome: JobOutcome) -> Result<JobOutcome> {
        match settled {
            Ok(()) => Ok(outcome),
            Err(AppError::Conflict(reason)) => {
                self.stats.record_lost();
                warn!(worker = %self.id, job_id = %job.id, reason = %reason, "Lease lost, outcome discarded");
                Ok(JobOutcome::Lost(job.id.clone()))
            }
            Err(e) => Err(e),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
