pub mod codec;
pub mod kafka;
pub mod memory_log;

pub use kafka::{KafkaConsumer, KafkaProducer};
pub use memory_log::MemoryEventLog;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub const TOPIC_ORDERS: &str = "orders";

/// Producer side of the event log. Intake appends here
/// on topic `orders`, keyed by id, partitioned by `codec::partition_for`.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, key: &[u8], value: Vec<u8>) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Consumer side: a stable consumer group with manual offset commit.
#[async_trait]
pub trait EventLogConsumer: Send + Sync {
    /// Seeks every assigned partition to the log's current high-water mark.
    async fn seek_to_tail(&self) -> Result<()>;

    /// Blocking fetch honouring the batch-fetch tuning of
    /// (minimum-bytes 10 KiB, maximum-wait 1s, ceiling 10 MiB), approximated
    /// here by `max_wait` plus an implementation-side byte ceiling.
    async fn poll_batch(&self, max_wait: Duration) -> Result<Vec<LogRecord>>;

    /// Commits the highest contiguous processed offset per partition.
    async fn commit(&self, records: &[LogRecord]) -> Result<()>;
}
