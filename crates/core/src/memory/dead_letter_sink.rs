// In-memory DeadLetterSink

use crate::domain::DeadLetterRecord;
use crate::error::Result;
use crate::port::DeadLetterSink;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Append-only record list. Lost on restart; use the SQLite sink for durability.
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn record(&self, item: DeadLetterRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let duplicate = records
            .iter()
            .any(|r| r.original_queue == item.original_queue && r.original_job_id == item.original_job_id);
        if duplicate {
            debug!(
                queue = %item.original_queue,
                job_id = %item.original_job_id,
                "Dead letter already recorded, keeping the first"
            );
            return Ok(());
        }
        records.push(item);
        Ok(())
    }

    async fn for_each(&self, visitor: &mut (dyn for<'r> FnMut(&'r DeadLetterRecord) + Send)) -> Result<()> {
        // Visit a snapshot so the visitor runs without the lock
        let snapshot = self.records();
        for record in &snapshot {
            visitor(record);
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.records.lock().unwrap_or_else(PoisonError::into_inner).len() as i64)
    }
}
