// Port Layer - Interfaces for external dependencies

pub mod dead_letter_sink;
pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod job_repository;
pub mod sleeper;
pub mod time_provider;

// Re-exports
pub use dead_letter_sink::DeadLetterSink;
pub use id_provider::IdProvider;
pub use job_handler::{handler_fn, FnHandler, JobError, JobHandler};
pub use job_repository::JobRepository;
pub use sleeper::Sleeper;
pub use time_provider::TimeProvider;
