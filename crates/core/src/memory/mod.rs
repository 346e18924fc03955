// In-memory adapters for single-process deployments and tests

mod dead_letter_sink;
mod job_repository;

pub use dead_letter_sink::InMemoryDeadLetterSink;
pub use job_repository::InMemoryJobRepository;
