//! Mock implementations for testing

use crate::error::{VStoreError, VStoreResult};
use crate::observability::{EvaluationRecord, EvaluationSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Evaluation sink that keeps submitted records in memory
#[derive(Debug, Default)]
pub struct MockEvaluationSink {
    pub records: Arc<Mutex<Vec<EvaluationRecord>>>,
    pub attempts: Arc<Mutex<usize>>,
    pub should_fail: AtomicBool,
}

impl MockEvaluationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Start or stop rejecting submissions
    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    pub fn get_records(&self) -> Vec<EvaluationRecord> {
        self.records.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
        *self.attempts.lock() = 0;
    }
}

#[async_trait]
impl EvaluationSink for MockEvaluationSink {
    async fn submit(&self, record: &EvaluationRecord) -> VStoreResult<()> {
        *self.attempts.lock() += 1;
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(VStoreError::request_failed("Mock evaluation sink failure"));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
