// Dead Letter Sink Port (Interface)

use crate::domain::DeadLetterRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Terminal, append-only store of jobs that could not be completed.
///
/// `record` must either persist the item or return an error; it never drops
/// silently. Recording the same `(original_queue, original_job_id)` twice keeps
/// the first record, so a redelivered job cannot be dead-lettered twice.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, item: DeadLetterRecord) -> Result<()>;

    /// Visit every record in failure order
    async fn for_each(&self, visitor: &mut (dyn for<'r> FnMut(&'r DeadLetterRecord) + Send)) -> Result<()>;

    async fn count(&self) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Sink whose storage is down: every `record` fails
    #[derive(Default)]
    pub struct FailingDeadLetterSink {
        attempts: AtomicU32,
    }

    impl FailingDeadLetterSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of `record` calls received
        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeadLetterSink for FailingDeadLetterSink {
        async fn record(&self, _item: DeadLetterRecord) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::SinkUnavailable("dead letter storage offline".to_string()))
        }

        async fn for_each(&self, _visitor: &mut (dyn for<'r> FnMut(&'r DeadLetterRecord) + Send)) -> Result<()> {
            Err(AppError::SinkUnavailable("dead letter storage offline".to_string()))
        }

        async fn count(&self) -> Result<i64> {
            Err(AppError::SinkUnavailable("dead letter storage offline".to_string()))
        }
    }
}
