//! Resilience primitives for calls to unreliable dependencies.
//!
//! # Composition
//! ```text
//! RetryExecutor::execute_guarded
//!     -> CircuitBreaker::call        (fail fast while OPEN)
//!         -> operation               (errors mapped into DependencyError at the boundary)
//! ```
//!
//! An open-circuit rejection classifies as non-retryable, so retry on the
//! outside never busy-loops against an OPEN breaker.

pub mod circuit_breaker;
pub mod error;
pub mod observer;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use error::{
    CallError, CircuitOpenError, Classification, Classify, DependencyError, ErrorClass, NetworkFailure,
};
pub use observer::{CircuitObserver, TracingObserver};
pub use registry::CircuitBreakerRegistry;
pub use retry::{default_is_retryable, RetryExecutor, RetryPolicy, RetryPredicate};
