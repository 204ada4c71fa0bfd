use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::repository::OrderRepository;
use crate::kv::{KvStore, ORDERS_ACTIVE, ORDERS_PENDING_COUNTER, ORDERS_PENDING_SLOTS, order_key, order_visible_at_key};

use super::{FanOut, NewOrderEvent};

const TICK: Duration = Duration::from_secs(1);

/// C4 embargo promoter. Wakes on a 1s tick or on an explicit
/// nudge from the materialiser, and compare-and-sets every
/// `orders:pending_slots` member whose `visible_at` has elapsed into
/// `orders:active`, broadcasting `new_order` for each one promoted.
pub async fn run_embargo_promoter(
    db: Arc<dyn OrderRepository>,
    kv: Arc<dyn KvStore>,
    fanout: Arc<FanOut>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(TICK) => {}
            _ = fanout.notify.notified() => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = promote_pass(db.as_ref(), kv.as_ref(), fanout.as_ref(), clock.as_ref()).await {
            tracing::error!(error = %e, "embargo promotion pass failed");
        }
    }
    tracing::info!("embargo promoter exiting after current pass");
}

/// Single sweep of `orders:pending_slots`. Exposed so the
/// HTTP egress can trigger an immediate pass (`GET /orders` triggers
/// embargo promotion as a side effect before reading `orders:active`)
/// in addition to the promoter's own ticking loop.
pub async fn promote_pass(
    db: &dyn OrderRepository,
    kv: &dyn KvStore,
    fanout: &FanOut,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let now = clock.now();
    for id_str in kv.smembers(ORDERS_PENDING_SLOTS).await? {
        let Ok(id) = Uuid::parse_str(&id_str) else {
            tracing::warn!(raw = %id_str, "malformed id in orders:pending_slots, dropping");
            kv.srem(ORDERS_PENDING_SLOTS, &id_str).await.ok();
            continue;
        };

        let visible_at = match resolve_visible_at(kv, db, &id).await? {
            Some(v) => v,
            None => {
                // Dead reference: no cache entry and no DB row. Drop it so
                // the pending set doesn't grow unbounded.
                kv.srem(ORDERS_PENDING_SLOTS, &id_str).await.ok();
                continue;
            }
        };
        if visible_at > now {
            continue;
        }

        match db.compare_and_set_accepted(&id).await {
            Ok(promoted) => {
                // Either this call promoted it, or a previous pass already
                // did (redelivery/crash-restart); either way the pending
                // marker is stale and must be cleared.
                let _ = promoted;
                refresh_cached_status(kv, &id).await?;
                kv.srem(ORDERS_PENDING_SLOTS, &id_str).await?;
                kv.sadd(ORDERS_ACTIVE, &id_str).await?;
                kv.decr(ORDERS_PENDING_COUNTER).await.ok();

                let display_id = display_id_of(kv, db, &id).await.unwrap_or_default();
                fanout.broadcast(NewOrderEvent { id, display_id });
            }
            Err(e) => {
                tracing::warn!(order_id = %id, error = %e, "compare-and-set to accepted failed");
            }
        }
    }
    Ok(())
}

async fn resolve_visible_at(
    kv: &dyn KvStore,
    db: &dyn OrderRepository,
    id: &Uuid,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    if let Some(raw) = kv.get(&order_visible_at_key(&id.to_string())).await? {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
    }
    Ok(db.fetch_by_id(id).await?.map(|o| o.visible_at))
}

async fn display_id_of(kv: &dyn KvStore, db: &dyn OrderRepository, id: &Uuid) -> Option<String> {
    if let Ok(Some(raw)) = kv.get(&order_key(&id.to_string())).await {
        if let Ok(order) = serde_json::from_str::<crate::domain::Order>(&raw) {
            return Some(order.display_id);
        }
    }
    db.fetch_by_id(id).await.ok().flatten().map(|o| o.display_id)
}

async fn refresh_cached_status(kv: &dyn KvStore, id: &Uuid) -> anyhow::Result<()> {
    let key = order_key(&id.to_string());
    if let Some(raw) = kv.get(&key).await? {
        if let Ok(mut order) = serde_json::from_str::<crate::domain::Order>(&raw) {
            order.status = crate::domain::order::OrderStatus::Accepted;
            let reencoded = serde_json::to_string(&order)?;
            kv.set_ex(&key, &reencoded, crate::kv::ORDER_TTL_SECS).await?;
        }
    }
    Ok(())
}
