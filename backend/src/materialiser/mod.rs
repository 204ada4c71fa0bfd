pub mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::clock::Clock;
use crate::db::repository::OrderRepository;
use crate::domain::Order;
use crate::error::AppError;
use crate::eventlog::{EventLogConsumer, LogRecord, codec};
use crate::fanout::FanOut;
use crate::kv::{
    KvStore, ORDERS_ACTIVE, ORDERS_DEAD_LETTER, ORDERS_PENDING_COUNTER, ORDERS_PENDING_SLOTS,
    ORDERS_TOTAL_COUNTER, ORDER_TTL_SECS, order_key, order_slot_start_key, order_visible_at_key,
};

use retry::with_retry;

/// Maximum wait per fetch.
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Commit cadence for the background committer.
const COMMIT_INTERVAL: Duration = Duration::from_secs(5);

/// C3: consumes every order event at least once, materialises it into the
/// cache and relational store, and hands it to fan-out.
pub struct Materialiser {
    consumer: Arc<dyn EventLogConsumer>,
    db: Arc<dyn OrderRepository>,
    kv: Arc<dyn KvStore>,
    fanout: Arc<FanOut>,
    clock: Arc<dyn Clock>,
}

impl Materialiser {
    pub fn new(
        consumer: Arc<dyn EventLogConsumer>,
        db: Arc<dyn OrderRepository>,
        kv: Arc<dyn KvStore>,
        fanout: Arc<FanOut>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            consumer,
            db,
            kv,
            fanout,
            clock,
        }
    }

    /// Runs until `shutdown` fires. On clean shutdown, finishes the
    /// in-flight batch, commits, and returns `Ok`. A `FatalDownstream`
    /// error from a message halts consumption and is
    /// returned to the caller, which maps it onto exit code 2.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AppError> {
        let mut last_commit = Instant::now();
        let mut uncommitted: Vec<LogRecord> = Vec::new();

        loop {
            let shutting_down = *shutdown.borrow();

            let batch = tokio::select! {
                biased;
                _ = shutdown.changed(), if !shutting_down => {
                    continue;
                }
                result = self.consumer.poll_batch(MAX_WAIT) => {
                    result.map_err(|e| AppError::TransientDownstream(e.to_string()))?
                }
            };

            for record in &batch {
                self.process_record(record).await?;
            }
            uncommitted.extend(batch);

            let due = last_commit.elapsed() >= COMMIT_INTERVAL;
            if (due || shutting_down) && !uncommitted.is_empty() {
                self.consumer
                    .commit(&uncommitted)
                    .await
                    .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
                uncommitted.clear();
                last_commit = Instant::now();
            }

            if shutting_down {
                break;
            }
        }

        tracing::info!("materialiser exiting after final commit");
        Ok(())
    }

    /// Polls one batch and processes it without committing. Exposed for
    /// integration tests that need to drive materialisation a step at a
    /// time, driving `process_record` directly the way `run`'s loop body
    /// does.
    pub async fn drain_available(&self) -> Result<usize, AppError> {
        let batch = self
            .consumer
            .poll_batch(MAX_WAIT)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
        let n = batch.len();
        for record in &batch {
            self.process_record(record).await?;
        }
        Ok(n)
    }

    /// Per-message processing. Order-preserving
    /// within a partition because the caller awaits each record in turn.
    async fn process_record(&self, record: &LogRecord) -> Result<(), AppError> {
        let order = match codec::decode(&record.value) {
            Ok(order) => order,
            Err(e) => {
                // Step 1: decode failure on both schemas -> dead-letter,
                // commit, never block the partition.
                tracing::warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "dead-lettering undecodable order event"
                );
                self.dead_letter(record, &e.to_string()).await;
                return Ok(());
            }
        };

        with_retry("materialiser.upsert", || async {
            self.db
                .upsert_if_not_regressing(&order)
                .await
                .map_err(|e| AppError::TransientDownstream(e.to_string()))
        })
        .await?;

        with_retry("materialiser.cache_put", || async {
            self.put_order_in_cache(&order)
                .await
                .map_err(|e| AppError::TransientDownstream(e.to_string()))
        })
        .await?;

        let id = order.id.to_string();

        // Step 5: first-writer-wins, 24h TTL.
        with_retry("materialiser.seed_visible_at", || async {
            self.kv
                .set_nx_ex(&order_visible_at_key(&id), &order.visible_at.to_rfc3339(), ORDER_TTL_SECS)
                .await
                .map_err(|e| AppError::TransientDownstream(e.to_string()))
        })
        .await?;
        with_retry("materialiser.seed_slot_start", || async {
            self.kv
                .set_nx_ex(&order_slot_start_key(&id), &order.slot_start.to_rfc3339(), ORDER_TTL_SECS)
                .await
                .map_err(|e| AppError::TransientDownstream(e.to_string()))
        })
        .await?;

        // Step 6: membership reconciliation, all set ops (idempotent under
        // replay P5).
        let now = self.clock.now();
        if order.visible_at > now {
            with_retry("materialiser.mark_pending", || async {
                self.kv
                    .srem(ORDERS_ACTIVE, &id)
                    .await
                    .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
                self.kv
                    .sadd(ORDERS_PENDING_SLOTS, &id)
                    .await
                    .map_err(|e| AppError::TransientDownstream(e.to_string()))
            })
            .await?;
        } else {
            with_retry("materialiser.mark_active", || async {
                self.kv
                    .srem(ORDERS_PENDING_SLOTS, &id)
                    .await
                    .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
                self.kv
                    .sadd(ORDERS_ACTIVE, &id)
                    .await
                    .map_err(|e| AppError::TransientDownstream(e.to_string()))
            })
            .await?;
        }

        // Step 7: advisory counters; never read by an invariant.
        self.kv.incr(ORDERS_TOTAL_COUNTER).await.ok();
        self.kv.incr(ORDERS_PENDING_COUNTER).await.ok();

        // Step 8: notify fan-out. Embargoed orders only nudge the
        // promoter; already-visible orders broadcast immediately.
        if let Err(e) = self.fanout.handle_materialized(order.id, order.display_id.clone()).await {
            tracing::warn!(order_id = %order.id, error = %e, "fan-out notification failed");
        }

        Ok(())
    }

    async fn put_order_in_cache(&self, order: &Order) -> anyhow::Result<()> {
        // The event log's canonical wire encoding is versioned bincode
        // (`codec::encode_v1`); the cache's `KvStore` surface is
        // string-valued, so
        // the cache's canonical encoding is this order's JSON projection.
        // Every reader of `order:{id}` in this crate (`fanout`, `bootstrap`)
        // decodes with the same `serde_json` round trip.
        let json = serde_json::to_string(order)?;
        self.kv
            .set_ex(&order_key(&order.id.to_string()), &json, ORDER_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, record: &LogRecord, reason: &str) {
        if let Err(e) = self
            .db
            .record_dead_letter(record.partition, record.offset, reason)
            .await
        {
            tracing::error!(error = %e, "failed to record dead letter in db");
        }
        let entry = format!("{}:{}:{}", record.partition, record.offset, reason);
        if let Err(e) = self.kv.rpush(ORDERS_DEAD_LETTER, &entry).await {
            tracing::error!(error = %e, "failed to record dead letter in kv");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::db::memory_repository::MemoryOrderRepository;
    use crate::domain::order::{Customer, LineItem, OrderStatus};
    use crate::eventlog::MemoryEventLog;
    use crate::kv::MemoryKv;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_order(visible_at: chrono::DateTime<Utc>) -> Order {
        Order {
            id: Uuid::new_v4(),
            display_id: "0001".into(),
            items: vec![LineItem {
                sku: "margherita".into(),
                quantity: 1,
                unit_price: 1000,
                extras: vec![],
                pizza_price: 1000,
                extras_price: 0,
            }],
            total_price: 1000,
            final_price: 1000,
            is_pickup: true,
            customer: Customer {
                phone: "15551234567".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                delivery_address: None,
            },
            created_at: Utc::now(),
            visible_at,
            slot_id: "20260301T0900".into(),
            slot_start: Utc::now(),
            status: OrderStatus::Pending,
        }
    }

    fn harness(
        now: chrono::DateTime<Utc>,
    ) -> (Materialiser, Arc<MemoryEventLog>, Arc<MemoryOrderRepository>, Arc<MemoryKv>) {
        let log = Arc::new(MemoryEventLog::new());
        let db = Arc::new(MemoryOrderRepository::new());
        let kv = Arc::new(MemoryKv::new());
        let clock = Arc::new(TestClock::new(now));
        let fanout = FanOut::new(kv.clone());
        let materialiser = Materialiser::new(
            log.clone() as Arc<dyn EventLogConsumer>,
            db.clone() as Arc<dyn OrderRepository>,
            kv.clone() as Arc<dyn KvStore>,
            fanout,
            clock as Arc<dyn Clock>,
        );
        (materialiser, log, db, kv)
    }

    #[tokio::test]
    async fn embargoed_order_lands_in_pending_slots_not_active() {
        let now = Utc::now();
        let (m, log, db, kv) = harness(now);
        let order = sample_order(now + chrono::Duration::minutes(5));
        let bytes = codec::encode_v1(&order).unwrap();
        log.append(order.id.as_bytes(), bytes).await.unwrap();

        let batch = log.poll_batch(Duration::from_secs(1)).await.unwrap();
        for r in &batch {
            m.process_record(r).await.unwrap();
        }

        assert!(kv.sismember(ORDERS_PENDING_SLOTS, &order.id.to_string()).await.unwrap());
        assert!(!kv.sismember(ORDERS_ACTIVE, &order.id.to_string()).await.unwrap());
        assert!(db.fetch_by_id(&order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn already_visible_order_lands_directly_in_active() {
        let now = Utc::now();
        let (m, log, _db, kv) = harness(now);
        let order = sample_order(now - chrono::Duration::minutes(1));
        let bytes = codec::encode_v1(&order).unwrap();
        log.append(order.id.as_bytes(), bytes).await.unwrap();

        let batch = log.poll_batch(Duration::from_secs(1)).await.unwrap();
        for r in &batch {
            m.process_record(r).await.unwrap();
        }

        assert!(kv.sismember(ORDERS_ACTIVE, &order.id.to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn redelivery_of_the_same_event_is_idempotent() {
        let now = Utc::now();
        let (m, log, db, kv) = harness(now);
        let order = sample_order(now - chrono::Duration::minutes(1));
        let bytes = codec::encode_v1(&order).unwrap();
        log.append(order.id.as_bytes(), bytes.clone()).await.unwrap();

        let batch = log.poll_batch(Duration::from_secs(1)).await.unwrap();
        for r in &batch {
            m.process_record(r).await.unwrap();
            m.process_record(r).await.unwrap();
        }

        assert_eq!(
            kv.smembers(ORDERS_ACTIVE).await.unwrap().len(),
            1,
            "redelivery must not duplicate set membership"
        );
        assert_eq!(
            db.fetch_by_statuses(&[OrderStatus::Pending, OrderStatus::Accepted])
                .await
                .unwrap()
                .len(),
            1,
            "redelivery must not duplicate the db row"
        );
    }

    #[tokio::test]
    async fn status_is_never_regressed_by_a_stale_redelivery() {
        let now = Utc::now();
        let (m, log, db, _kv) = harness(now);
        let order = sample_order(now - chrono::Duration::minutes(1));
        let bytes = codec::encode_v1(&order).unwrap();
        log.append(order.id.as_bytes(), bytes.clone()).await.unwrap();

        let batch = log.poll_batch(Duration::from_secs(1)).await.unwrap();
        m.process_record(&batch[0]).await.unwrap();

        db.compare_and_set_accepted(&order.id).await.unwrap();
        assert_eq!(
            db.fetch_by_id(&order.id).await.unwrap().unwrap().status,
            OrderStatus::Accepted
        );

        // Stale redelivery of the original `pending` event must not
        // regress the row back to `pending`.
        m.process_record(&batch[0]).await.unwrap();
        assert_eq!(
            db.fetch_by_id(&order.id).await.unwrap().unwrap().status,
            OrderStatus::Accepted
        );
    }

    #[tokio::test]
    async fn undecodable_bytes_are_dead_lettered_and_do_not_block() {
        let now = Utc::now();
        let (m, log, db, kv) = harness(now);
        log.append(b"bad-id", b"not a valid payload".to_vec()).await.unwrap();

        let batch = log.poll_batch(Duration::from_secs(1)).await.unwrap();
        for r in &batch {
            m.process_record(r).await.unwrap();
        }

        assert_eq!(db.dead_letter_count(), 1);
        assert_eq!(kv.lrange(ORDERS_DEAD_LETTER, 0, -1).await.unwrap().len(), 1);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::clock::TestClock;
    use crate::db::memory_repository::MemoryOrderRepository;
    use crate::domain::order::{Customer, LineItem, OrderStatus};
    use crate::eventlog::MemoryEventLog;
    use crate::kv::MemoryKv;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn order(visible_at: chrono::DateTime<Utc>) -> Order {
        Order {
            id: Uuid::new_v4(),
            display_id: "0001".into(),
            items: vec![LineItem {
                sku: "margherita".into(),
                quantity: 1,
                unit_price: 1000,
                extras: vec![],
                pizza_price: 1000,
                extras_price: 0,
            }],
            total_price: 1000,
            final_price: 1000,
            is_pickup: true,
            customer: Customer {
                phone: "15551234567".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                delivery_address: None,
            },
            created_at: Utc::now(),
            visible_at,
            slot_id: "20260301T0900".into(),
            slot_start: Utc::now(),
            status: OrderStatus::Pending,
        }
    }

    // P5: replaying the same materialised event any number of times leaves
    // the db row, the cache entry, and set membership exactly as they were
    // after the first delivery.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn redelivery_any_number_of_times_converges_to_one_copy(
            replays in 1..10usize,
            minutes_until_visible in -30..30i64,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (active_count, pending_count, db_count) = rt.block_on(async move {
                let now = Utc::now();
                let log = Arc::new(MemoryEventLog::new());
                let db = Arc::new(MemoryOrderRepository::new());
                let kv = Arc::new(MemoryKv::new());
                let clock = Arc::new(TestClock::new(now));
                let fanout = FanOut::new(kv.clone());
                let m = Materialiser::new(
                    log.clone() as Arc<dyn EventLogConsumer>,
                    db.clone() as Arc<dyn OrderRepository>,
                    kv.clone() as Arc<dyn KvStore>,
                    fanout,
                    clock as Arc<dyn Clock>,
                );

                let o = order(now + chrono::Duration::minutes(minutes_until_visible));
                let bytes = codec::encode_v1(&o).unwrap();
                log.append(o.id.as_bytes(), bytes).await.unwrap();
                let batch = log.poll_batch(Duration::from_secs(1)).await.unwrap();

                for _ in 0..replays {
                    m.process_record(&batch[0]).await.unwrap();
                }

                (
                    kv.smembers(ORDERS_ACTIVE).await.unwrap().len(),
                    kv.smembers(ORDERS_PENDING_SLOTS).await.unwrap().len(),
                    db.fetch_by_id(&o.id).await.unwrap().is_some() as usize,
                )
            });

            prop_assert_eq!(active_count + pending_count, 1);
            prop_assert_eq!(db_count, 1);
        }
    }
}
