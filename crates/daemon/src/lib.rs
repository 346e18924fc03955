//! Steadfast daemon library
//!
//! Composition root: settings, logging, and the `Runtime` that wires the
//! SQLite adapters into queues, worker pools, and circuit breakers.
//! Applications embedding Steadfast register their handlers on a
//! `JobDispatcher` and call `Runtime::start`.

pub mod handlers;
pub mod logging;
pub mod monitor;
pub mod runtime;
pub mod settings;

pub use handlers::JobDispatcher;
pub use logging::init_logging;
pub use monitor::DeadLetterMonitor;
pub use runtime::{Runtime, RunningRuntime};
pub use settings::Settings;
