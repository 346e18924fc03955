//! Circuit breaker guarding calls to one external dependency.
//!
//! # State Transitions
//! ```text
//! Closed   -> Open:     consecutive_failures reaches failure_threshold
//! Open     -> HalfOpen: first call after reset_timeout_ms has elapsed (lazy, no timer)
//! HalfOpen -> Closed:   half_open_probe_count successes
//! HalfOpen -> Open:     any failure
//! ```
//!
//! Outcomes reported while Open belong to calls admitted earlier and change
//! nothing; the cool-down is measured from the failure that opened the circuit.
//!
//! State reads and read-modify-write transitions are serialized by one mutex per
//! breaker. The lock is never held while the guarded operation runs, so probe
//! admission in HalfOpen is best-effort under concurrency.

use super::error::{CallError, CircuitOpenError};
use super::observer::{CircuitObserver, TracingObserver};
use crate::domain::DomainError;
use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Per-dependency breaker settings, fixed when the breaker is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_probe_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_probe_count: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64, half_open_probe_count: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout_ms,
            half_open_probe_count,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.failure_threshold == 0 {
            return Err(DomainError::ValidationError(
                "failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.half_open_probe_count == 0 {
            return Err(DomainError::ValidationError(
                "half_open_probe_count must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read-only view of a breaker for health endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<i64>,
    pub half_open_successes: u32,
}

type Transition = (CircuitState, CircuitState);

#[derive(Debug, Clone, PartialEq, Eq)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<i64>,
    half_open_successes: u32,
}

impl BreakerState {
    fn initial() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_successes: 0,
        }
    }

    fn move_to(&mut self, to: CircuitState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }

    /// Admission check; Open lazily becomes HalfOpen once the cool-down has elapsed
    fn admit(&mut self, config: &CircuitBreakerConfig, now: i64) -> (Result<(), u64>, Option<Transition>) {
        if self.state != CircuitState::Open {
            return (Ok(()), None);
        }

        let last_failure = self.last_failure_at.unwrap_or(now);
        let elapsed = now.saturating_sub(last_failure);
        let reset_timeout = i64::try_from(config.reset_timeout_ms).unwrap_or(i64::MAX);

        if elapsed > reset_timeout {
            self.half_open_successes = 0;
            let transition = self.move_to(CircuitState::HalfOpen);
            return (Ok(()), transition);
        }

        // A clock that went backwards yields elapsed < 0: report the full cool-down
        let remaining = reset_timeout.saturating_sub(elapsed.max(0)).max(0);
        (Err(remaining as u64), None)
    }

    fn on_success(&mut self, config: &CircuitBreakerConfig) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= config.half_open_probe_count {
                    self.consecutive_failures = 0;
                    self.half_open_successes = 0;
                    self.move_to(CircuitState::Closed)
                } else {
                    None
                }
            }
            // Late completion of a call admitted before the circuit opened
            CircuitState::Open => None,
        }
    }

    fn on_failure(&mut self, config: &CircuitBreakerConfig, now: i64) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_failure_at = Some(now);
                if self.consecutive_failures >= config.failure_threshold {
                    self.move_to(CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_failure_at = Some(now);
                self.half_open_successes = 0;
                self.move_to(CircuitState::Open)
            }
            // Late failure of a call admitted before the circuit opened: the
            // cool-down stays anchored at the failure that opened it
            CircuitState::Open => None,
        }
    }

    fn reset(&mut self) -> Option<Transition> {
        let from = self.state;
        *self = Self::initial();
        (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
    }
}

/// Circuit breaker for a single named dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: Arc<dyn TimeProvider>,
    observer: Arc<dyn CircuitObserver>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Breaker on the system clock, logging transitions through `tracing`
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_parts(name, config, Arc::new(SystemTimeProvider), Arc::new(TracingObserver))
    }

    pub fn with_parts(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn TimeProvider>,
        observer: Arc<dyn CircuitObserver>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::initial()),
            clock,
            observer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State is plain counters; a panicking observer cannot leave it half-written
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.observer.on_transition(&self.name, from, to);
        }
    }

    /// Admit or reject a call. Rejection carries the remaining cool-down.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let now = self.clock.now_millis();
        let (admission, transition) = self.lock().admit(&self.config, now);
        self.notify(transition);

        admission.map_err(|retry_after_ms| {
            debug!(breaker = %self.name, retry_after_ms, "Call rejected by open circuit");
            CircuitOpenError {
                service_name: self.name.clone(),
                retry_after_ms,
            }
        })
    }

    pub fn record_success(&self) {
        let transition = self.lock().on_success(&self.config);
        self.notify(transition);
    }

    pub fn record_failure(&self) {
        let now = self.clock.now_millis();
        let transition = self.lock().on_failure(&self.config, now);
        self.notify(transition);
    }

    /// Run `operation` through the breaker.
    ///
    /// Returns the operation's value, its own error (after updating state), or
    /// `CallError::Open` without invoking it while the circuit is open.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CallError::Operation(err))
            }
        }
    }

    /// Like `call`, but an open circuit yields `fallback(&rejection)` instead of an error.
    /// Operation errors propagate unchanged.
    pub async fn call_with_fallback<T, E, F, Fut, FB>(&self, operation: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(&CircuitOpenError) -> T,
    {
        match self.call(operation).await {
            Ok(value) => Ok(value),
            Err(CallError::Open(rejection)) => Ok(fallback(&rejection)),
            Err(CallError::Operation(err)) => Err(err),
        }
    }

    /// `call_with_fallback` with a fixed fallback value
    pub async fn call_or<T, E, F, Fut>(&self, operation: F, fallback: T) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with_fallback(operation, |_| fallback).await
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn state(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            half_open_successes: inner.half_open_successes,
        }
    }

    /// Force CLOSED with zeroed counters (operator override)
    pub fn reset(&self) {
        let transition = self.lock().reset();
        self.notify(transition);
    }
}
