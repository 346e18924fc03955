// Dead letter monitor - operator visibility into the sink

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steadfast_core::application::ShutdownToken;
use steadfast_core::domain::DeadLetterRecord;
use steadfast_core::error::Result;
use steadfast_core::port::DeadLetterSink;
use tracing::{error, info, warn};

/// Warns whenever the number of dead letters grows
pub struct DeadLetterMonitor {
    sink: Arc<dyn DeadLetterSink>,
    last_count: AtomicI64,
}

impl DeadLetterMonitor {
    pub fn new(sink: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            sink,
            last_count: AtomicI64::new(0),
        }
    }

    /// Dead letters per original queue
    pub async fn summarize(&self) -> Result<BTreeMap<String, u64>> {
        let mut per_queue = BTreeMap::new();
        self.sink
            .for_each(&mut |record: &DeadLetterRecord| {
                *per_queue.entry(record.original_queue.clone()).or_insert(0) += 1;
            })
            .await?;
        Ok(per_queue)
    }

    /// Compare the sink size with the previous check; returns the number of new records
    pub async fn check(&self) -> Result<i64> {
        let count = self.sink.count().await?;
        let previous = self.last_count.swap(count, Ordering::SeqCst);
        let added = count - previous;
        if added > 0 {
            warn!(added = added, total = count, "New dead letters recorded");
        }
        Ok(added.max(0))
    }

    pub async fn run(&self, interval: Duration, mut shutdown: ShutdownToken) {
        match self.summarize().await {
            Ok(per_queue) => {
                let total: u64 = per_queue.values().sum();
                self.last_count.store(total as i64, Ordering::SeqCst);
                info!(total = total, per_queue = ?per_queue, "Dead letter sink opened");
            }
            Err(e) => error!(error = %e, "Dead letter summary failed"),
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check().await {
                        error!(error = %e, "Dead letter check failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    }
}
