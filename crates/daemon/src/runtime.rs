// Runtime - wiring of breakers, queues, worker pools, and operator duties

use crate::monitor::DeadLetterMonitor;
use crate::settings::Settings;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use steadfast_core::application::worker::WorkerStatsSnapshot;
use steadfast_core::application::{shutdown_channel, JobQueue, RecoveryService, ShutdownSender, WorkerPool};
use steadfast_core::port::id_provider::UuidProvider;
use steadfast_core::port::time_provider::SystemTimeProvider;
use steadfast_core::port::{DeadLetterSink, IdProvider, JobHandler, JobRepository, TimeProvider};
use steadfast_core::resilience::{CircuitBreaker, CircuitBreakerRegistry, RetryExecutor};
use steadfast_infra_sqlite::{create_pool, run_migrations, SqliteDeadLetterSink, SqliteJobRepository};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything the daemon owns, built from `Settings`.
///
/// Handlers reach dependencies through `registry()` and `retry_executor()`,
/// so every caller of one dependency shares one breaker.
pub struct Runtime {
    settings: Settings,
    registry: Arc<CircuitBreakerRegistry>,
    queues: HashMap<String, Arc<JobQueue>>,
    sink: Arc<dyn DeadLetterSink>,
}

impl Runtime {
    /// Open the SQLite database named by the settings and run migrations
    pub async fn connect(settings: Settings) -> Result<Self> {
        info!(database_url = %settings.database_url, "Initializing database...");
        if let Some(dir) = database_dir(&settings.database_url) {
            std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let pool = create_pool(&settings.database_url, settings.max_connections)
            .await
            .context("DB pool creation failed")?;
        run_migrations(&pool).await.context("Migration failed")?;

        let job_repo = Arc::new(SqliteJobRepository::new(pool.clone()));
        let sink = Arc::new(SqliteDeadLetterSink::new(pool));
        Self::with_storage(settings, job_repo, sink, Arc::new(UuidProvider), Arc::new(SystemTimeProvider))
    }

    /// Build on caller-supplied storage (in-memory adapters, tests)
    pub fn with_storage(
        settings: Settings,
        job_repo: Arc<dyn JobRepository>,
        sink: Arc<dyn DeadLetterSink>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        settings.validate()?;

        let registry = Arc::new(CircuitBreakerRegistry::new(settings.default_breaker.clone()));
        // Named breakers get their configured settings on first (and only) creation
        for (name, config) in &settings.breakers {
            registry.get(name, Some(config.clone()));
        }

        let mut queues = HashMap::new();
        for config in &settings.queues {
            let queue = JobQueue::new(
                config.clone(),
                Arc::clone(&job_repo),
                Arc::clone(&id_provider),
                Arc::clone(&time_provider),
            )
            .with_context(|| format!("queue {}", config.name))?;
            queues.insert(config.name.clone(), Arc::new(queue));
        }

        Ok(Self {
            settings,
            registry,
            queues,
            sink,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> Arc<CircuitBreakerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Shorthand for `registry().get(name, None)`
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.registry.get(name, None)
    }

    /// Executor for a named retry policy, or the default policy if none is configured
    pub fn retry_executor(&self, policy: &str) -> RetryExecutor {
        match self.settings.retry_policies.get(policy) {
            Some(policy) => RetryExecutor::new(policy.clone()),
            None => {
                warn!(policy = %policy, "Unknown retry policy, using defaults");
                RetryExecutor::new(Default::default())
            }
        }
    }

    pub fn queue(&self, name: &str) -> Option<Arc<JobQueue>> {
        self.queues.get(name).cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn sink(&self) -> Arc<dyn DeadLetterSink> {
        Arc::clone(&self.sink)
    }

    /// Release leases orphaned by a previous process, then start worker pools,
    /// the lease reaper, and the dead letter monitor.
    ///
    /// Every queue runs `handler`; route by job name with `JobDispatcher`.
    pub async fn start(&self, handler: Arc<dyn JobHandler>) -> Result<RunningRuntime> {
        let queues: Vec<Arc<JobQueue>> = self.queues.values().cloned().collect();
        let recovery = Arc::new(RecoveryService::new(queues.clone(), Arc::clone(&self.sink)));

        info!("Running crash recovery...");
        let report = recovery.sweep().await.context("crash recovery failed")?;
        info!(
            released_jobs = report.released,
            dead_lettered_jobs = report.dead_lettered,
            "Crash recovery completed"
        );

        let (shutdown, token) = shutdown_channel();

        let pools = queues
            .into_iter()
            .map(|queue| WorkerPool::spawn(queue, Arc::clone(&handler), Arc::clone(&self.sink), token.clone()))
            .collect();

        let mut background = Vec::new();
        {
            let token = shutdown.token();
            let interval = Duration::from_millis(self.settings.reaper_interval_ms);
            background.push(tokio::spawn(async move { recovery.run(interval, token).await }));
        }
        {
            let monitor = DeadLetterMonitor::new(Arc::clone(&self.sink));
            let token = shutdown.token();
            let interval = Duration::from_millis(self.settings.dead_letter_monitor_interval_ms);
            background.push(tokio::spawn(async move { monitor.run(interval, token).await }));
        }

        Ok(RunningRuntime {
            shutdown,
            pools,
            background,
            grace: Duration::from_millis(self.settings.shutdown_grace_ms),
        })
    }
}

/// Parent directory of a file-backed `sqlite://` database
fn database_dir(database_url: &str) -> Option<PathBuf> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Handles of a started runtime
pub struct RunningRuntime {
    shutdown: ShutdownSender,
    pools: Vec<WorkerPool>,
    background: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl RunningRuntime {
    /// Counters per queue, sorted by queue name
    pub fn stats(&self) -> Vec<(String, WorkerStatsSnapshot)> {
        let mut stats: Vec<(String, WorkerStatsSnapshot)> = self
            .pools
            .iter()
            .map(|pool| (pool.queue().to_string(), pool.stats().snapshot()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Signal shutdown and wait (up to the grace period) for in-flight jobs
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.shutdown();

        let pools = self.pools;
        let background = self.background;
        let drain = async move {
            for pool in pools {
                pool.join().await?;
            }
            for handle in background {
                handle.await.context("background task failed")?;
            }
            Ok::<(), anyhow::Error>(())
        };

        match tokio::time::timeout(self.grace, drain).await {
            Ok(result) => result,
            Err(_) => {
                // Unfinished jobs keep their lease and are redelivered after it expires
                warn!(grace_ms = self.grace.as_millis() as u64, "Shutdown grace period elapsed");
                Ok(())
            }
        }
    }
}
