//! Steadfast daemon - main entry point
//!
//! Runs worker pools for every configured queue with the built-in handlers,
//! until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use steadfast_daemon::{init_logging, JobDispatcher, Runtime, Settings};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging; keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging()?;

    info!("Steadfast daemon v{} starting...", VERSION);

    // 2. Settings
    let settings = Settings::load()?;
    info!(
        queues = settings.queues.len(),
        breakers = settings.breakers.len(),
        "Settings loaded"
    );

    // 3. Storage and wiring
    let runtime = Runtime::connect(settings).await?;

    // 4. Workers, lease reaper, dead letter monitor
    let dispatcher = JobDispatcher::with_builtins();
    info!(handlers = ?dispatcher.job_names(), queues = ?runtime.queue_names(), "Starting workers");
    let running = runtime.start(Arc::new(dispatcher)).await?;

    info!("Steadfast daemon ready");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining workers...");

    for (queue, stats) in running.stats() {
        info!(queue = %queue, stats = ?stats, "Final worker stats");
    }
    running.shutdown().await?;

    info!("Steadfast daemon stopped");
    Ok(())
}
