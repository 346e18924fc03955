// Steadfast Infrastructure - SQLite Adapter
// Implements: JobRepository, DeadLetterSink

mod connection;
mod dead_letter_sink;
mod error;
mod job_repository;
mod migration;

pub use connection::create_pool;
pub use dead_letter_sink::SqliteDeadLetterSink;
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is done by `error::map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
