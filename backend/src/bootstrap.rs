use std::sync::Arc;

use crate::clock::Clock;
use crate::db::repository::OrderRepository;
use crate::domain::OrderStatus;
use crate::eventlog::EventLogConsumer;
use crate::kv::{
    KvStore, ORDERS_ACTIVE, ORDERS_PENDING_SLOTS, ORDER_TTL_SECS, order_key, order_slot_start_key,
    order_visible_at_key,
};

/// Kitchen-relevant statuses rebuilt into the cache on startup. `Archived`/`Cancelled`/`Delivered` rows are left in the
/// database only; nothing downstream needs them in KV.
const KITCHEN_RELEVANT: &[OrderStatus] = &[
    OrderStatus::Pending,
    OrderStatus::Accepted,
    OrderStatus::Preparing,
    OrderStatus::Cooking,
    OrderStatus::Ready,
];

#[derive(Debug, Default)]
pub struct BootstrapSummary {
    pub active: usize,
    pub pending: usize,
}

/// BOOT: runs once, before C3 starts consuming. Reads every
/// kitchen-relevant row out of the database, repopulates the cache and the
/// derived `orders:active` / `orders:pending_slots` sets, then tells the
/// consumer to seek to the log's tail so already-materialised orders are
/// never replayed.
pub async fn run(
    db: Arc<dyn OrderRepository>,
    kv: Arc<dyn KvStore>,
    consumer: Arc<dyn EventLogConsumer>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<BootstrapSummary> {
    let rows = db.fetch_by_statuses(KITCHEN_RELEVANT).await?;
    let now = clock.now();
    let mut summary = BootstrapSummary::default();

    for order in rows {
        let id = order.id.to_string();
        let json = serde_json::to_string(&order)?;
        kv.set_ex(&order_key(&id), &json, ORDER_TTL_SECS).await?;
        kv.set_nx_ex(
            &order_visible_at_key(&id),
            &order.visible_at.to_rfc3339(),
            ORDER_TTL_SECS,
        )
        .await?;
        kv.set_nx_ex(
            &order_slot_start_key(&id),
            &order.slot_start.to_rfc3339(),
            ORDER_TTL_SECS,
        )
        .await?;

        if order.status == OrderStatus::Pending && order.visible_at > now {
            kv.sadd(ORDERS_PENDING_SLOTS, &id).await?;
            summary.pending += 1;
        } else {
            kv.sadd(ORDERS_ACTIVE, &id).await?;
            summary.active += 1;
        }
    }

    tracing::info!(
        active = summary.active,
        pending = summary.pending,
        "bootstrap rebuilt derived cache state"
    );

    consumer.seek_to_tail().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::db::memory_repository::MemoryOrderRepository;
    use crate::domain::order::{Customer, LineItem};
    use crate::eventlog::MemoryEventLog;
    use crate::kv::MemoryKv;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample(status: OrderStatus, visible_at: chrono::DateTime<Utc>) -> crate::domain::Order {
        crate::domain::Order {
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
            status,
        }
    }

    #[tokio::test]
    async fn still_embargoed_pending_rows_land_in_pending_slots() {
        let now = Utc::now();
        let repo = Arc::new(MemoryOrderRepository::new());
        repo.upsert_if_not_regressing(&sample(OrderStatus::Pending, now + chrono::Duration::minutes(5)))
            .await
            .unwrap();
        let kv = Arc::new(MemoryKv::new());
        let log = Arc::new(MemoryEventLog::new());
        let clock = Arc::new(TestClock::new(now));

        let summary = run(
            repo as Arc<dyn OrderRepository>,
            kv.clone() as Arc<dyn KvStore>,
            log as Arc<dyn crate::eventlog::EventLogConsumer>,
            clock as Arc<dyn Clock>,
        )
        .await
        .unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.active, 0);
        assert_eq!(kv.smembers(ORDERS_PENDING_SLOTS).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn accepted_rows_land_in_active() {
        let now = Utc::now();
        let repo = Arc::new(MemoryOrderRepository::new());
        repo.upsert_if_not_regressing(&sample(OrderStatus::Accepted, now - chrono::Duration::minutes(5)))
            .await
            .unwrap();
        let kv = Arc::new(MemoryKv::new());
        let log = Arc::new(MemoryEventLog::new());
        let clock = Arc::new(TestClock::new(now));

        let summary = run(
            repo as Arc<dyn OrderRepository>,
            kv.clone() as Arc<dyn KvStore>,
            log as Arc<dyn crate::eventlog::EventLogConsumer>,
            clock as Arc<dyn Clock>,
        )
        .await
        .unwrap();
        assert_eq!(summary.active, 1);
        assert_eq!(kv.smembers(ORDERS_ACTIVE).await.unwrap().len(), 1);
    }
}
