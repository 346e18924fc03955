// Lease recovery - redelivery of jobs whose worker vanished
use crate::application::dead_letter::{self, Forwarded};
use crate::application::job_queue::JobQueue;
use crate::application::worker::ShutdownToken;
use crate::domain::{DeadLetterRecord, LEASE_EXPIRED_ERROR};
use crate::error::{AppError, Result};
use crate::port::DeadLetterSink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What one sweep did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Returned to PENDING for another attempt
    pub released: u64,
    /// Expired on their last attempt and moved to the dead letter sink
    pub dead_lettered: u64,
}

/// Returns expired IN_PROGRESS jobs to PENDING across a set of queues.
///
/// Runs once at startup (jobs orphaned by a crash) and then periodically
/// (workers stuck past their lease). A job whose lease expired on its last
/// allowed attempt is dead-lettered instead, so no handler runs more than
/// `max_attempts` times.
pub struct RecoveryService {
    queues: Vec<Arc<JobQueue>>,
    sink: Arc<dyn DeadLetterSink>,
}

impl RecoveryService {
    pub fn new(queues: Vec<Arc<JobQueue>>, sink: Arc<dyn DeadLetterSink>) -> Self {
        Self { queues, sink }
    }

    /// One sweep over every queue
    pub async fn sweep(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for queue in &self.queues {
            let released = queue.release_expired_leases().await?;
            if released > 0 {
                info!(queue = %queue.name(), released = released, "Released expired leases");
            }
            report.released += released;
            report.dead_lettered += self.dead_letter_exhausted(queue).await?;
        }
        Ok(report)
    }

    async fn dead_letter_exhausted(&self, queue: &JobQueue) -> Result<u64> {
        let mut dead_lettered = 0;
        for mut job in queue.expired_exhausted().await? {
            let record = DeadLetterRecord::from_job(&job, LEASE_EXPIRED_ERROR, queue.now_millis());
            match dead_letter::forward(queue.repository(), self.sink.as_ref(), &mut job, &record).await {
                Ok(forwarded) => {
                    warn!(
                        queue = %queue.name(),
                        job_id = %job.id,
                        attempts_made = job.attempts_made,
                        recorded = forwarded == Forwarded::Recorded,
                        "Lease expired on last attempt, job dead-lettered"
                    );
                    dead_lettered += 1;
                }
                // A late worker settled it first
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(dead_lettered)
    }

    /// Sweep every `interval` until shutdown; a failed sweep is logged and retried next tick
    pub async fn run(&self, interval: Duration, mut shutdown: ShutdownToken) {
        info!(interval_ms = interval.as_millis() as u64, queues = self.queues.len(), "Lease reaper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Lease sweep failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Lease reaper stopped");
    }
}
