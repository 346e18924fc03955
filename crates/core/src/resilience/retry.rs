// Retry executor: bounded retries with exponential backoff and jitter

use super::circuit_breaker::CircuitBreaker;
use super::error::{CallError, Classification, Classify, ErrorClass};
use crate::domain::backoff::{exponential_delay_ms, with_jitter};
use crate::domain::DomainError;
use crate::port::sleeper::{Sleeper, TokioSleeper};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Custom retry classifier
pub type RetryPredicate = Arc<dyn Fn(&Classification) -> bool + Send + Sync>;

/// Default classifier.
///
/// Explicit `retryable_codes` win, then: network failures and 5xx retry, 4xx and
/// open-circuit rejections do not, anything unclassified retries.
pub fn default_is_retryable(classification: &Classification, retryable_codes: &[String]) -> bool {
    match classification {
        Classification::CircuitOpen => false,
        Classification::Code(code) if retryable_codes.iter().any(|c| c == code) => true,
        Classification::Status(status) if retryable_codes.iter().any(|c| *c == status.to_string()) => true,
        Classification::Network(failure) if retryable_codes.iter().any(|c| c == failure.code()) => true,
        Classification::Network(_) => true,
        Classification::Status(status) if (500..600).contains(status) => true,
        Classification::Status(status) if (400..500).contains(status) => false,
        Classification::Status(_) | Classification::Code(_) | Classification::Unclassified => true,
    }
}

/// Retry policy value object.
///
/// `max_attempts` counts retries: an operation runs at most `max_attempts + 1` times.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Codes (status codes as decimal strings) that are always retried
    pub retryable_codes: Vec<String>,
    #[serde(skip)]
    predicate: Option<RetryPredicate>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retryable_codes", &self.retryable_codes)
            .field("predicate", &self.predicate.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_codes: Vec::new(),
            predicate: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            ..Default::default()
        }
    }

    pub fn with_retryable_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the default classifier
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Classification) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(DomainError::ValidationError(format!(
                "backoff_multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(DomainError::ValidationError(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn is_retryable<E: Classify>(&self, err: &E) -> bool {
        let classification = err.classify();
        match &self.predicate {
            Some(predicate) => predicate(&classification),
            None => default_is_retryable(&classification, &self.retryable_codes),
        }
    }

    pub fn error_class<E: Classify>(&self, err: &E) -> ErrorClass {
        if self.is_retryable(err) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    /// Delay after failed attempt `attempt` (0-indexed), before jitter
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        exponential_delay_ms(self.base_delay_ms, self.backoff_multiplier, attempt, self.max_delay_ms)
    }

    pub fn jittered_delay_ms(&self, attempt: u32) -> u64 {
        with_jitter(self.delay_ms(attempt))
    }
}

/// Runs operations under a retry policy.
///
/// Holds no per-call state: every `execute` keeps its own attempt counter.
pub struct RetryExecutor {
    default_policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self::with_sleeper(default_policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(default_policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            default_policy,
            sleeper,
        }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Execute `operation`, retrying transient failures.
    ///
    /// Returns the first success, or the last attempt's error unchanged once the
    /// budget is spent or a non-retryable error is seen.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, mut operation: F, policy: Option<&RetryPolicy>) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let policy = policy.unwrap_or(&self.default_policy);
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = %name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !policy.is_retryable(&err) {
                        debug!(operation = %name, attempt, error = %err, "Non-retryable error");
                        return Err(err);
                    }
                    if attempt >= policy.max_attempts {
                        warn!(
                            operation = %name,
                            attempts = attempt + 1,
                            error = %err,
                            "Retry budget exhausted"
                        );
                        return Err(err);
                    }

                    let delay_ms = policy.jittered_delay_ms(attempt);
                    info!(
                        operation = %name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms,
                        error = %err,
                        "Retrying after failure"
                    );
                    self.sleeper.sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Retry on the outside, breaker on the inside.
    ///
    /// Each attempt goes through `breaker`; an open-circuit rejection ends the
    /// retry loop immediately since waiting cannot move the breaker's cool-down clock.
    pub async fn execute_guarded<T, E, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
        policy: Option<&RetryPolicy>,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.execute(
            breaker.name(),
            || {
                // Futures are inert until polled: a rejected attempt never runs
                let attempt = operation();
                breaker.call(move || attempt)
            },
            policy,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sleeper::mocks::RecordingSleeper;
    use crate::resilience::error::{DependencyError, NetworkFailure};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(policy: RetryPolicy) -> (RetryExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        (RetryExecutor::with_sleeper(policy, sleeper.clone()), sleeper)
    }

    #[tokio::test]
    async fn test_always_failing_operation_runs_max_attempts_plus_one() {
        let (executor, sleeper) = executor(RetryPolicy::new(3, 10, 1_000, 2.0));
        let calls = &AtomicU32::new(0);

        let err = executor
            .execute(
                "profile-service",
                || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(DependencyError::status(503, format!("attempt {}", n)))
                },
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err, DependencyError::status(503, "attempt 4"));
        assert_eq!(sleeper.delays().len(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (executor, sleeper) = executor(RetryPolicy::new(3, 10, 1_000, 2.0));
        let calls = &AtomicU32::new(0);

        let err = executor
            .execute(
                "course-catalog",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DependencyError::status(404, "no such course"))
                },
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err, DependencyError::status(404, "no such course"));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_delays_follow_exponential_bounds() {
        let policy = RetryPolicy::new(4, 100, 60_000, 3.0);
        let (executor, sleeper) = executor(policy.clone());

        let _ = executor
            .execute(
                "mailer",
                || async move { Err::<(), _>(DependencyError::network(NetworkFailure::Timeout, "slow")) },
                None,
            )
            .await;

        let delays = sleeper.delays();
        assert_eq!(delays.len(), 4);
        for (n, delay) in delays.iter().enumerate() {
            let base = 100.0 * 3f64.powi(n as i32);
            let ms = delay.as_millis() as f64;
            assert!(ms >= base, "delay {} below {}", ms, base);
            assert!(ms <= base.min(60_000.0) * 1.1, "delay {} above bound", ms);
        }
    }

    #[tokio::test]
    async fn test_delay_is_capped_by_max_delay() {
        let policy = RetryPolicy::new(5, 1_000, 2_500, 2.0);
        assert_eq!(policy.delay_ms(0), 1_000);
        assert_eq!(policy.delay_ms(1), 2_000);
        assert_eq!(policy.delay_ms(2), 2_500);
        assert!(policy.jittered_delay_ms(6) < 2_750);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let (executor, sleeper) = executor(RetryPolicy::new(3, 10, 1_000, 2.0));
        let calls = &AtomicU32::new(0);

        let value = executor
            .execute(
                "payments",
                || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DependencyError::network(NetworkFailure::ConnectionReset, "reset"))
                    } else {
                        Ok("charged")
                    }
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(value, "charged");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_codes_and_custom_predicate() {
        let (executor, _) = executor(RetryPolicy::default());
        let calls = &AtomicU32::new(0);

        let rate_limited = RetryPolicy::new(2, 1, 10, 2.0).with_retryable_codes(["429"]);
        let _ = executor
            .execute(
                "video-transcoder",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DependencyError::status(429, "slow down"))
                },
                Some(&rate_limited),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let never = RetryPolicy::new(5, 1, 10, 2.0).with_predicate(|_| false);
        let _ = executor
            .execute(
                "video-transcoder",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DependencyError::other("flaky"))
                },
                Some(&never),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_classification_table() {
        let none: &[String] = &[];
        assert!(default_is_retryable(&Classification::Network(NetworkFailure::Dns), none));
        assert!(default_is_retryable(&Classification::Status(502), none));
        assert!(!default_is_retryable(&Classification::Status(400), none));
        assert!(!default_is_retryable(&Classification::CircuitOpen, none));
        assert!(default_is_retryable(&Classification::Code("E_WEIRD".into()), none));
        assert!(default_is_retryable(&Classification::Unclassified, none));
        assert!(!default_is_retryable(&Classification::CircuitOpen, &["circuit_open".to_string()]));
    }

    #[tokio::test]
    async fn test_guarded_execution_stops_on_open_circuit() {
        use crate::port::time_provider::mocks::ManualClock;
        use crate::resilience::circuit_breaker::CircuitBreakerConfig;
        use crate::resilience::observer::mocks::RecordingObserver;

        let breaker = CircuitBreaker::with_parts(
            "payments",
            CircuitBreakerConfig::new(2, 60_000, 1),
            Arc::new(ManualClock::new(0)),
            Arc::new(RecordingObserver::new()),
        );
        let (executor, sleeper) = executor(RetryPolicy::new(5, 10, 1_000, 2.0));
        let calls = &AtomicU32::new(0);

        let err = executor
            .execute_guarded(
                &breaker,
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DependencyError::status(503, "down"))
                },
                None,
            )
            .await
            .unwrap_err();

        // Two real failures open the breaker, the third attempt is rejected and not retried
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::new(3, 100, 1_000, 0.5).validate().is_err());
        assert!(RetryPolicy::new(3, 5_000, 1_000, 2.0).validate().is_err());
        assert!(RetryPolicy::new(3, 100, 1_000, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_policy_from_config() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts":5,"retryable_codes":["429"]}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.error_class(&DependencyError::status(429, "")), ErrorClass::Transient);
    }
}
