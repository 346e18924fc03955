// Backoff computation shared by RetryExecutor and job retries

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Upper bound of the random jitter, as a fraction of the computed delay.
pub const JITTER_RATIO: f64 = 0.1;

/// Multiplier used by `Backoff::Exponential` job backoff.
pub const JOB_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Exponential delay without jitter.
///
/// `min(base_delay_ms * multiplier^attempt, max_delay_ms)`, where `attempt` is
/// 0-indexed (the delay before the first retry uses `attempt = 0`).
pub fn exponential_delay_ms(base_delay_ms: u64, multiplier: f64, attempt: u32, max_delay_ms: u64) -> u64 {
    if base_delay_ms == 0 {
        return 0;
    }
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = base_delay_ms as f64 * multiplier.powi(exponent);
    if raw.is_nan() {
        return max_delay_ms;
    }
    // f64 -> u64 casts saturate, so an overflowing exponent lands on the cap
    (raw.min(max_delay_ms as f64)) as u64
}

/// Add uniform, non-negative jitter: the result lies in `[delay, delay * 1.1)`.
pub fn with_jitter(delay_ms: u64) -> u64 {
    let factor: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let jitter = (delay_ms as f64 * JITTER_RATIO * factor) as u64;
    delay_ms.saturating_add(jitter)
}

/// Job backoff strategy (per queue default, overridable per job)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// `delay_ms * 2^attempt`
    Exponential { delay_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { delay_ms: 1000 }
    }
}

impl Backoff {
    pub fn base_delay_ms(&self) -> u64 {
        match self {
            Backoff::Fixed { delay_ms } | Backoff::Exponential { delay_ms } => *delay_ms,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay_ms`, without jitter
    pub fn delay_ms(&self, attempt: u32, max_delay_ms: u64) -> u64 {
        match self {
            Backoff::Fixed { delay_ms } => (*delay_ms).min(max_delay_ms),
            Backoff::Exponential { delay_ms } => {
                exponential_delay_ms(*delay_ms, JOB_BACKOFF_MULTIPLIER, attempt, max_delay_ms)
            }
        }
    }

    /// Delay before retry number `attempt` with jitter applied
    pub fn jittered_delay_ms(&self, attempt: u32, max_delay_ms: u64) -> u64 {
        with_jitter(self.delay_ms(attempt, max_delay_ms))
    }
}
