// Circuit Breaker Registry - one breaker per dependency name

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use super::observer::{CircuitObserver, TracingObserver};
use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Named breaker cache, owned by the composition root and passed by reference.
///
/// Config is fixed at first creation: a later `get` with a different config
/// returns the existing instance untouched. Entries are never removed.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn TimeProvider>,
    observer: Arc<dyn CircuitObserver>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_parts(default_config, Arc::new(SystemTimeProvider), Arc::new(TracingObserver))
    }

    pub fn with_parts(
        default_config: CircuitBreakerConfig,
        clock: Arc<dyn TimeProvider>,
        observer: Arc<dyn CircuitObserver>,
    ) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
            clock,
            observer,
        }
    }

    /// Existing breaker for `name`, or a new one built from `config` (or the default config)
    pub fn get(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the write lock: another caller may have created it meanwhile
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            let config = config.unwrap_or_else(|| self.default_config.clone());
            info!(
                breaker = %name,
                failure_threshold = config.failure_threshold,
                reset_timeout_ms = config.reset_timeout_ms,
                half_open_probe_count = config.half_open_probe_count,
                "Circuit breaker created"
            );
            Arc::new(CircuitBreaker::with_parts(
                name,
                config,
                Arc::clone(&self.clock),
                Arc::clone(&self.observer),
            ))
        });
        Arc::clone(breaker)
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        info!(count = breakers.len(), "Resetting all circuit breakers");
        for breaker in breakers {
            breaker.reset();
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshots of every registered breaker, sorted by name
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|b| b.state())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::ManualClock;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::observer::mocks::RecordingObserver;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::with_parts(
            CircuitBreakerConfig::new(2, 1_000, 1),
            Arc::new(ManualClock::new(0)),
            Arc::new(RecordingObserver::new()),
        )
    }

    #[test]
    fn test_get_returns_same_instance() {
        let registry = registry();
        let a = registry.get("payments", None);
        let b = registry.get("payments", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_config_fixed_at_first_creation() {
        let registry = registry();
        let first = registry.get("mailer", Some(CircuitBreakerConfig::new(10, 60_000, 2)));
        let second = registry.get("mailer", Some(CircuitBreakerConfig::new(1, 5, 1)));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 10);
        assert_eq!(second.config().reset_timeout_ms, 60_000);
    }

    #[test]
    fn test_default_config_used_when_none_given() {
        let registry = registry();
        assert_eq!(registry.get("video", None).config(), &CircuitBreakerConfig::new(2, 1_000, 1));
    }

    #[test]
    fn test_reset_all() {
        let registry = registry();
        for name in ["payments", "mailer"] {
            let breaker = registry.get(name, None);
            breaker.record_failure();
            breaker.record_failure();
            assert_eq!(breaker.current_state(), CircuitState::Open);
        }

        registry.reset_all();

        for snapshot in registry.snapshots() {
            assert_eq!(snapshot.state, CircuitState::Closed);
            assert_eq!(snapshot.consecutive_failures, 0);
        }
        assert_eq!(registry.names(), vec!["mailer".to_string(), "payments".to_string()]);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_instance() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get("search", None))
            })
            .collect();

        let breakers: Vec<Arc<CircuitBreaker>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
