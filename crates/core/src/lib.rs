// Steadfast Core - resilience primitives, job pipeline, and ports
// NO infrastructure dependencies (hexagonal architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod memory;
pub mod port;
pub mod resilience;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
