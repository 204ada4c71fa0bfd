pub mod embargo;
pub mod hub;
pub mod projection;

pub use embargo::{promote_pass, run_embargo_promoter};
pub use projection::{Role, project_for_role};

use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use crate::kv::{KvStore, ORDERS_ACTIVE, order_key};
use hub::Hub;

/// Lightweight push payload. Full order content is obtained by the subscriber's own pull
/// request, already role-projected, so there is nothing to strip here.
#[derive(Clone, Debug)]
pub struct NewOrderEvent {
    pub id: Uuid,
    pub display_id: String,
}

/// C4 fan-out: the two subscriber hubs plus the mechanism that decides
/// whether a materialised order is broadcastable yet.
pub struct FanOut {
    kitchen: Hub<NewOrderEvent>,
    dashboard: Hub<NewOrderEvent>,
    kv: Arc<dyn KvStore>,
    notify: Notify,
}

impl FanOut {
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self {
            kitchen: Hub::new(),
            dashboard: Hub::new(),
            kv,
            notify: Notify::new(),
        })
    }

    pub fn register_kitchen(&self) -> (Uuid, mpsc::Receiver<NewOrderEvent>) {
        self.kitchen.register()
    }

    pub fn register_dashboard(&self) -> (Uuid, mpsc::Receiver<NewOrderEvent>) {
        self.dashboard.register()
    }

    pub fn unregister_kitchen(&self, id: Uuid) {
        self.kitchen.unregister(id);
    }

    pub fn unregister_dashboard(&self, id: Uuid) {
        self.dashboard.unregister(id);
    }

    /// Called by the materialiser right after membership reconciliation.
    /// An order already in `orders:active` is visible
    /// now and gets broadcast immediately; an embargoed order only nudges the
    /// promoter to recheck ahead of its next scheduled tick, so visibility
    /// never precedes `visible_at`.
    pub async fn handle_materialized(&self, id: Uuid, display_id: String) -> anyhow::Result<()> {
        let is_active = self.kv.sismember(ORDERS_ACTIVE, &id.to_string()).await?;
        if is_active {
            self.broadcast(NewOrderEvent { id, display_id });
        } else {
            self.notify.notify_one();
        }
        Ok(())
    }

    fn broadcast(&self, evt: NewOrderEvent) {
        self.kitchen.broadcast(evt.clone());
        self.dashboard.broadcast(evt);
    }

    /// Pull surface behind `GET /orders`: every id currently in
    /// `orders:active`, decoded from cache and projected for `role`.
    pub async fn active_orders(&self, role: Role) -> anyhow::Result<Vec<crate::domain::Order>> {
        self.orders_in_set(ORDERS_ACTIVE, role).await
    }

    /// Pull surface behind `GET /orders/pending` (admin-only view of orders
    /// still embargoed).
    pub async fn pending_orders(&self, role: Role) -> anyhow::Result<Vec<crate::domain::Order>> {
        self.orders_in_set(crate::kv::ORDERS_PENDING_SLOTS, role).await
    }

    async fn orders_in_set(
        &self,
        set_key: &str,
        role: Role,
    ) -> anyhow::Result<Vec<crate::domain::Order>> {
        let ids = self.kv.smembers(set_key).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(raw) = self.kv.get(&order_key(&id)).await? else {
                continue;
            };
            match serde_json::from_str::<crate::domain::Order>(&raw) {
                Ok(mut order) => {
                    project_for_role(&mut order, role);
                    out.push(order);
                }
                Err(e) => {
                    tracing::warn!(order_id = %id, error = %e, "dropping undecodable cached order");
                }
            }
        }
        Ok(out)
    }
}
