//! Logging setup
//!
//! - `RUST_LOG`: filter directives (default `steadfast=info,dead_letter=info`)
//! - `STEADFAST_LOG_FORMAT`: `pretty` (default) or `json`
//! - `STEADFAST_LOG_DIR`: also write JSON logs to a daily rolling file there

use anyhow::{anyhow, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "STEADFAST_LOG_FORMAT";
pub const LOG_DIR_ENV: &str = "STEADFAST_LOG_DIR";

/// `dead_letter` carries records the sink could not store; never filter it out by default
pub const DEFAULT_FILTER: &str = "steadfast=info,dead_letter=info";

const LOG_FILE_PREFIX: &str = "steadfastd.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }

    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or(LogFormat::Pretty)
    }
}

/// Install the global subscriber.
///
/// Hold the returned guard until exit; dropping it flushes and stops the file writer.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) => {
            let dir = crate::settings::expand_path(&dir);
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    let result = match LogFormat::from_env() {
        // Production: JSON structured logging
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(guard)
}
