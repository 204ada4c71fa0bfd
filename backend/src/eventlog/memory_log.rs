use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{EventLog, EventLogConsumer, LogRecord};

struct Inner {
    records: Vec<LogRecord>,
    next_offset_to_deliver: usize,
    committed_offset: i64,
}

/// In-process stand-in for the event log used by tests.
/// Single partition, single consumer, sufficient for exercising
/// order-preserving-within-a-partition semantics without a real broker.
pub struct MemoryEventLog {
    inner: Mutex<Inner>,
    fail_appends: AtomicBool,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::new(),
                next_offset_to_deliver: 0,
                committed_offset: -1,
            }),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Test hook: makes every subsequent `append` fail until toggled back
    /// off, so `Intake::create_order`'s compensating `release_slot` path
    /// can be exercised without a real broker.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Test hook: re-emits an already-appended record at a fresh offset, or
    /// rewinds delivery so the next `poll_batch` redelivers from `offset`
    /// (used to simulate crash-restart / at-least-once redelivery).
    pub fn rewind_to(&self, offset: usize) {
        self.inner.lock().unwrap().next_offset_to_deliver = offset;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("simulated event log append failure"));
        }
        let mut inner = self.inner.lock().unwrap();
        let offset = inner.records.len() as i64;
        inner.records.push(LogRecord {
            partition: 0,
            offset,
            key: key.to_vec(),
            value,
        });
        Ok(())
    }
}

#[async_trait]
impl EventLogConsumer for MemoryEventLog {
    async fn seek_to_tail(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_offset_to_deliver = inner.records.len();
        Ok(())
    }

    async fn poll_batch(&self, _max_wait: Duration) -> Result<Vec<LogRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let start = inner.next_offset_to_deliver;
        let batch: Vec<LogRecord> = inner.records[start..].to_vec();
        inner.next_offset_to_deliver = inner.records.len();
        Ok(batch)
    }

    async fn commit(&self, records: &[LogRecord]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(max) = records.iter().map(|r| r.offset).max() {
            inner.committed_offset = inner.committed_offset.max(max);
        }
        Ok(())
    }
}
