// JobQueue - named durable work queue with per-queue execution defaults

pub mod enqueue;

pub use enqueue::{EnqueueOptions, EnqueueRequest};

use crate::domain::{DeadLetterRecord, Job, JobId, JobState, QueueConfig};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobRepository, TimeProvider};
use std::sync::Arc;
use tracing::info;

/// A queue bound to its storage.
///
/// Cheap to share behind `Arc`; workers and enqueuers of the same queue use
/// one instance.
pub struct JobQueue {
    config: QueueConfig,
    job_repo: Arc<dyn JobRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobQueue {
    /// Create a queue; its config is validated and fixed from here on
    pub fn new(
        config: QueueConfig,
        job_repo: Arc<dyn JobRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            job_repo,
            id_provider,
            time_provider,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    pub(crate) fn repository(&self) -> &dyn JobRepository {
        self.job_repo.as_ref()
    }

    /// Enqueue a new job; `options` override the queue defaults
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        payload: serde_json::Value,
        options: Option<EnqueueOptions>,
    ) -> Result<JobId> {
        let req = EnqueueRequest {
            name: name.into(),
            payload,
            options: options.unwrap_or_default(),
        };
        enqueue::execute(
            &self.config,
            self.job_repo.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            req,
        )
        .await
    }

    /// Re-enqueue a dead letter's payload as a fresh job with the queue defaults
    pub async fn replay(&self, record: &DeadLetterRecord) -> Result<JobId> {
        if record.original_queue != self.config.name {
            return Err(AppError::Validation(format!(
                "dead letter from queue {} cannot be replayed on {}",
                record.original_queue, self.config.name
            )));
        }
        let job_id = self
            .enqueue(record.job_name.clone(), record.payload.as_value().clone(), None)
            .await?;
        info!(
            job_id = %job_id,
            original_job_id = %record.original_job_id,
            queue = %self.config.name,
            "Dead letter replayed"
        );
        Ok(job_id)
    }

    pub async fn find(&self, id: &JobId) -> Result<Option<Job>> {
        self.job_repo.find_by_id(id).await
    }

    pub async fn count(&self, state: JobState) -> Result<i64> {
        self.job_repo.count_by_state(&self.config.name, state).await
    }

    /// Return jobs whose lease expired (crashed or stuck worker) to PENDING.
    ///
    /// Jobs with no attempts left stay IN_PROGRESS; see `expired_exhausted`.
    pub async fn release_expired_leases(&self) -> Result<u64> {
        self.job_repo
            .release_expired_leases(&self.config.name, self.time_provider.now_millis())
            .await
    }

    /// Jobs whose lease expired on their last allowed attempt
    pub async fn expired_exhausted(&self) -> Result<Vec<Job>> {
        self.job_repo
            .find_expired_exhausted(&self.config.name, self.time_provider.now_millis())
            .await
    }

    /// Claim the next due job under this queue's lease
    pub(crate) async fn claim_next(&self) -> Result<Option<Job>> {
        self.job_repo
            .claim_next(&self.config.name, self.time_provider.now_millis(), self.config.lease_ms)
            .await
    }
}
