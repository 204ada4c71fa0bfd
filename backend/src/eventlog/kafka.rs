use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset, TopicPartitionList};

use super::{EventLog, EventLogConsumer, LogRecord, TOPIC_ORDERS};
use crate::config::AppConfig;

/// Production `EventLog` backed by a Kafka-compatible broker. Partition assignment is left to librdkafka's default
/// partitioner keyed by `codec::partition_for`'s hash, written into the
/// record key.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaProducer {
    pub fn new(cfg: &AppConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &cfg.log_brokers)
            .set("message.timeout.ms", "5000")
            .set("compression.type", "lz4");

        if let (Some(user), Some(pass)) = (&cfg.log_sasl_user, &cfg.log_sasl_password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        }
        if let Some(ca) = &cfg.log_ca_cert {
            client_config.set("ssl.ca.location", ca);
        }

        let producer: FutureProducer = client_config
            .create()
            .context("constructing Kafka producer")?;

        Ok(Self {
            producer,
            topic: TOPIC_ORDERS.to_string(),
        })
    }
}

#[async_trait]
impl EventLog for KafkaProducer {
    async fn append(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&value);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("event log append failed: {e}"))?;
        Ok(())
    }
}

/// Production `EventLogConsumer`. Batch tuning mirrors:
/// `fetch.min.bytes` 10 KiB, `fetch.wait.max.ms` 1000, `fetch.message.max.bytes`
/// 10 MiB.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    pub fn new(cfg: &AppConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &cfg.log_brokers)
            .set("group.id", &cfg.consumer_group)
            .set("enable.auto.commit", "false")
            .set("fetch.min.bytes", "10240")
            .set("fetch.wait.max.ms", "1000")
            .set("fetch.message.max.bytes", "10485760")
            .set("auto.offset.reset", "earliest");

        if let (Some(user), Some(pass)) = (&cfg.log_sasl_user, &cfg.log_sasl_password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        }
        if let Some(ca) = &cfg.log_ca_cert {
            client_config.set("ssl.ca.location", ca);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("constructing Kafka consumer")?;
        consumer
            .subscribe(&[TOPIC_ORDERS])
            .context("subscribing to orders topic")?;

        Ok(Self {
            consumer,
            topic: TOPIC_ORDERS.to_string(),
        })
    }
}

#[async_trait]
impl EventLogConsumer for KafkaConsumer {
    async fn seek_to_tail(&self) -> Result<()> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(&self.topic), Duration::from_secs(5))?;
        let mut tpl = TopicPartitionList::new();
        for topic in metadata.topics() {
            for partition in topic.partitions() {
                let (_, high) = self.consumer.fetch_watermarks(
                    &self.topic,
                    partition.id(),
                    Duration::from_secs(5),
                )?;
                tpl.add_partition_offset(&self.topic, partition.id(), Offset::Offset(high))?;
            }
        }
        self.consumer.assign(&tpl)?;
        Ok(())
    }

    async fn poll_batch(&self, max_wait: Duration) -> Result<Vec<LogRecord>> {
        use futures::StreamExt;

        let mut out = Vec::new();
        let mut stream = self.consumer.stream();
        let deadline = tokio::time::sleep(max_wait);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                msg = stream.next() => {
                    match msg {
                        Some(Ok(m)) => {
                            out.push(LogRecord {
                                partition: m.partition(),
                                offset: m.offset(),
                                key: m.key().unwrap_or_default().to_vec(),
                                value: m.payload().unwrap_or_default().to_vec(),
                            });
                            if out.len() >= 500 {
                                break;
                            }
                        }
                        Some(Err(e)) => return Err(anyhow::anyhow!("event log fetch error: {e}")),
                        None => break,
                    }
                }
            }
        }
        Ok(out)
    }

    async fn commit(&self, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for r in records {
            tpl.add_partition_offset(&self.topic, r.partition, Offset::Offset(r.offset + 1))?;
        }
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)?;
        Ok(())
    }
}
