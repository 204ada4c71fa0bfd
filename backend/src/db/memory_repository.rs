use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::repository::OrderRepository;
use crate::domain::{Order, OrderStatus};

struct DeadLetter {
    partition: i32,
    offset: i64,
    reason: String,
}

/// In-process stand-in for `OrderRepository`, mirroring
/// `SqlxOrderRepository`'s status-non-regression semantics exactly without a database.
#[derive(Default)]
pub struct MemoryOrderRepository {
    orders: Mutex<Vec<Order>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn upsert_if_not_regressing(&self, order: &Order) -> anyhow::Result<()> {
        let mut rows = self.orders.lock();
        if let Some(existing) = rows.iter_mut().find(|o| o.id == order.id) {
            let mut updated = order.clone();
            if existing.status != OrderStatus::Pending {
                updated.status = existing.status;
            }
            *existing = updated;
        } else {
            rows.push(order.clone());
        }
        Ok(())
    }

    async fn fetch_by_id(&self, id: &Uuid) -> anyhow::Result<Option<Order>> {
        Ok(self.orders.lock().iter().find(|o| &o.id == id).cloned())
    }

    async fn fetch_by_statuses(&self, statuses: &[OrderStatus]) -> anyhow::Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .iter()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect())
    }

    async fn compare_and_set_accepted(&self, id: &Uuid) -> anyhow::Result<bool> {
        let mut rows = self.orders.lock();
        if let Some(row) = rows.iter_mut().find(|o| &o.id == id) {
            if row.status == OrderStatus::Pending {
                row.status = OrderStatus::Accepted;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn archive(&self, id: &Uuid) -> anyhow::Result<()> {
        if let Some(row) = self.orders.lock().iter_mut().find(|o| &o.id == id) {
            row.status = OrderStatus::Archived;
        }
        Ok(())
    }

    async fn record_dead_letter(&self, partition: i32, offset: i64, reason: &str) -> anyhow::Result<()> {
        let mut letters = self.dead_letters.lock();
        if letters.iter().any(|d| d.partition == partition && d.offset == offset) {
            return Ok(());
        }
        letters.push(DeadLetter {
            partition,
            offset,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
