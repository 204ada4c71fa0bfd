use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Order, OrderStatus};

/// Relational-store access for orders.
/// Implementations must make `upsert_if_not_regressing` idempotent under
/// redelivery.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts a new row, or updates an existing one without regressing its
    /// status.
    async fn upsert_if_not_regressing(&self, order: &Order) -> Result<()>;

    async fn fetch_by_id(&self, id: &Uuid) -> Result<Option<Order>>;

    /// Rows whose status is still kitchen-relevant.
    async fn fetch_by_statuses(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;

    /// Compare-and-set `pending -> accepted` only. Returns `true` if the row was
    /// transitioned by this call.
    async fn compare_and_set_accepted(&self, id: &Uuid) -> Result<bool>;

    /// Marks an order archived (HTTP egress `POST /orders/{id}/ready`,
    ///).
    async fn archive(&self, id: &Uuid) -> Result<()>;

    async fn record_dead_letter(&self, partition: i32, offset: i64, reason: &str) -> Result<()>;
}
