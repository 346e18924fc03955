// Worker pool - `concurrency` workers draining one queue

use super::shutdown::ShutdownToken;
use super::stats::WorkerStats;
use super::Worker;
use crate::application::job_queue::JobQueue;
use crate::error::{AppError, Result};
use crate::port::{DeadLetterSink, JobHandler};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct WorkerPool {
    queue: String,
    handles: Vec<JoinHandle<Result<()>>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    /// Spawn one worker per unit of the queue's configured concurrency
    pub fn spawn(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        sink: Arc<dyn DeadLetterSink>,
        shutdown: ShutdownToken,
    ) -> Self {
        let stats = Arc::new(WorkerStats::new());
        let concurrency = queue.config().concurrency;
        let name = queue.name().to_string();

        let handles = (0..concurrency)
            .map(|i| {
                let worker = Worker::new(
                    format!("{}-{}", name, i),
                    Arc::clone(&queue),
                    Arc::clone(&handler),
                    Arc::clone(&sink),
                    Arc::clone(&stats),
                );
                let token = shutdown.clone();
                tokio::spawn(async move { worker.run(token).await })
            })
            .collect();

        info!(queue = %name, concurrency = concurrency, "Worker pool started");
        Self {
            queue: name,
            handles,
            stats,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to stop (after the shutdown token fired)
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for handle in self.handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(AppError::Internal(format!("worker task failed: {}", join_err))),
            };
            if let Err(e) = outcome {
                error!(queue = %self.queue, error = %e, "Worker exited with error");
                first_error.get_or_insert(e);
            }
        }
        info!(queue = %self.queue, stats = ?self.stats.snapshot(), "Worker pool stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
