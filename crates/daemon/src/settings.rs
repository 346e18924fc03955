//! Daemon settings
//!
//! Sources, later ones win:
//! 1. built-in defaults
//! 2. TOML file at `STEADFAST_CONFIG` (default `~/.steadfast/steadfast.toml`, optional)
//! 3. `STEADFAST__*` environment variables, `__` separating nested keys
//!    (e.g. `STEADFAST__DATABASE_URL`, `STEADFAST__DEFAULT_BREAKER__FAILURE_THRESHOLD`)
//!
//! ```toml
//! database_url = "sqlite://~/.steadfast/steadfast.db"
//!
//! [default_breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 30000
//!
//! [breakers.payments]
//! failure_threshold = 3
//! reset_timeout_ms = 10000
//! half_open_probe_count = 1
//!
//! [retry_policies.http]
//! max_attempts = 4
//! retryable_codes = ["429"]
//!
//! [[queues]]
//! name = "emails"
//! default_max_attempts = 5
//! default_backoff = { type = "exponential", delay_ms = 2000 }
//! concurrency = 4
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use steadfast_core::application::worker::constants::DEFAULT_REAPER_INTERVAL;
use steadfast_core::domain::QueueConfig;
use steadfast_core::resilience::{CircuitBreakerConfig, RetryPolicy};

pub const CONFIG_PATH_ENV: &str = "STEADFAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "~/.steadfast/steadfast.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://~/.steadfast/steadfast.db";
const ENV_PREFIX: &str = "STEADFAST";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    /// Used for breakers not listed in `breakers`
    pub default_breaker: CircuitBreakerConfig,
    pub breakers: HashMap<String, CircuitBreakerConfig>,
    pub retry_policies: HashMap<String, RetryPolicy>,
    pub queues: Vec<QueueConfig>,
    pub reaper_interval_ms: u64,
    pub dead_letter_monitor_interval_ms: u64,
    /// Upper bound on waiting for in-flight jobs at shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 8,
            default_breaker: CircuitBreakerConfig::default(),
            breakers: HashMap::new(),
            retry_policies: HashMap::new(),
            queues: vec![QueueConfig::new("default")],
            reaper_interval_ms: DEFAULT_REAPER_INTERVAL.as_millis() as u64,
            dead_letter_monitor_interval_ms: 60_000,
            shutdown_grace_ms: 30_000,
        }
    }
}

impl Settings {
    /// Load from the configured file (if present) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&expand_path(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("failed to read settings from {}", path.display()))?
            .try_deserialize()
            .context("invalid settings")?;

        let mut settings = settings;
        settings.database_url = expand_database_url(&settings.database_url);
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the runtime could not honor
    pub fn validate(&self) -> Result<()> {
        self.default_breaker.validate().context("default_breaker")?;
        for (name, breaker) in &self.breakers {
            breaker.validate().with_context(|| format!("breaker {}", name))?;
        }
        for (name, policy) in &self.retry_policies {
            policy.validate().with_context(|| format!("retry policy {}", name))?;
        }
        if self.queues.is_empty() {
            anyhow::bail!("at least one queue must be configured");
        }
        let mut seen = std::collections::HashSet::new();
        for queue in &self.queues {
            queue.validate().with_context(|| format!("queue {}", queue.name))?;
            if !seen.insert(queue.name.as_str()) {
                anyhow::bail!("queue {} configured twice", queue.name);
            }
        }
        if self.reaper_interval_ms == 0 || self.dead_letter_monitor_interval_ms == 0 {
            anyhow::bail!("reaper and dead letter monitor intervals must be > 0");
        }
        Ok(())
    }
}

/// Expand `~` and environment variables in a filesystem path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(path).map(|p| p.into_owned()).unwrap_or_else(|_| path.to_string()))
}

/// Expand `~` inside a `sqlite://` URL; other URLs pass through
fn expand_database_url(url: &str) -> String {
    match url.strip_prefix("sqlite://") {
        Some(path) if !path.is_empty() && !path.starts_with(':') => {
            format!("sqlite://{}", expand_path(path).display())
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use steadfast_core::domain::Backoff;

    fn write_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("steadfast-settings-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.queues[0].name, "default");
        assert_eq!(Duration::from_millis(settings.reaper_interval_ms), DEFAULT_REAPER_INTERVAL);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("steadfast-does-not-exist.toml");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.max_connections, 8);
        assert!(settings.breakers.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let path = write_config(
            r#"
            database_url = "sqlite::memory:"
            reaper_interval_ms = 1000

            [breakers.payments]
            failure_threshold = 3
            reset_timeout_ms = 10000
            half_open_probe_count = 1

            [retry_policies.http]
            max_attempts = 4
            retryable_codes = ["429"]

            [[queues]]
            name = "emails"
            default_max_attempts = 5
            default_backoff = { type = "fixed", delay_ms = 2000 }
            concurrency = 4
            "#,
        );

        let settings = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.database_url, "sqlite::memory:");
        assert_eq!(settings.reaper_interval_ms, 1000);
        assert_eq!(settings.breakers["payments"], CircuitBreakerConfig::new(3, 10_000, 1));

        let http = &settings.retry_policies["http"];
        assert_eq!(http.max_attempts, 4);
        assert_eq!(http.base_delay_ms, 1000);
        assert_eq!(http.retryable_codes, vec!["429".to_string()]);

        let emails = &settings.queues[0];
        assert_eq!(emails.default_max_attempts, 5);
        assert_eq!(emails.default_backoff, Backoff::Fixed { delay_ms: 2000 });
        assert_eq!(emails.concurrency, 4);
        assert_eq!(emails.lease_ms, QueueConfig::default().lease_ms);
    }

    #[test]
    fn test_invalid_breaker_rejected() {
        let path = write_config(
            r#"
            [breakers.search]
            failure_threshold = 0
            "#,
        );
        let result = Settings::load_from(&path);
        std::fs::remove_file(&path).ok();
        assert!(format!("{:#}", result.unwrap_err()).contains("breaker search"));
    }

    #[test]
    fn test_duplicate_queue_rejected() {
        let mut settings = Settings::default();
        settings.queues.push(QueueConfig::new("default"));
        assert!(settings.validate().unwrap_err().to_string().contains("twice"));
    }

    #[test]
    fn test_database_url_tilde_expanded() {
        let expanded = expand_database_url("sqlite://~/jobs.db");
        assert!(!expanded.contains('~'));
        assert_eq!(expand_database_url("sqlite::memory:"), "sqlite::memory:");
    }
}
