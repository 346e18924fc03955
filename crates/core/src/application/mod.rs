// Application Layer - Use Cases and Business Logic

pub mod dead_letter;
pub mod job_queue;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use dead_letter::{forward, Forwarded};
pub use job_queue::{EnqueueOptions, JobQueue};
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{JobExhausted, RetryDecision};
pub use worker::{shutdown_channel, JobOutcome, ShutdownSender, ShutdownToken, Worker, WorkerPool, WorkerStats};
