// Domain Layer - Pure business logic and entities

pub mod backoff;
pub mod dead_letter;
pub mod error;
pub mod job;
pub mod queue;

// Re-exports
pub use backoff::Backoff;
pub use dead_letter::DeadLetterRecord;
pub use error::DomainError;
pub use job::{Job, JobId, JobName, JobPayload, JobState, Priority, LEASE_EXPIRED_ERROR};
pub use queue::{QueueConfig, QueueId};
