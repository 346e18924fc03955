// Circuit transition observer

use super::circuit_breaker::CircuitState;
use tracing::{info, warn};

/// Notified synchronously on every breaker state change.
///
/// Called after the breaker's lock is released, so implementations may read
/// breaker state.
pub trait CircuitObserver: Send + Sync {
    fn on_transition(&self, breaker: &str, from: CircuitState, to: CircuitState);
}

/// Logs transitions through `tracing` (default observer)
pub struct TracingObserver;

impl CircuitObserver for TracingObserver {
    fn on_transition(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(breaker = %breaker, from = %from, to = %to, "Circuit opened"),
            CircuitState::HalfOpen => info!(breaker = %breaker, from = %from, to = %to, "Circuit half-open, probing"),
            CircuitState::Closed => info!(breaker = %breaker, from = %from, to = %to, "Circuit closed"),
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Collects transitions in order
    #[derive(Default)]
    pub struct RecordingObserver {
        transitions: Mutex<Vec<(String, CircuitState, CircuitState)>>,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn transitions(&self) -> Vec<(String, CircuitState, CircuitState)> {
            self.transitions.lock().unwrap().clone()
        }
    }

    impl CircuitObserver for RecordingObserver {
        fn on_transition(&self, breaker: &str, from: CircuitState, to: CircuitState) {
            self.transitions
                .lock()
                .unwrap()
                .push((breaker.to_string(), from, to));
        }
    }
}
