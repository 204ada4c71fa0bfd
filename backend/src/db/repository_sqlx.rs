use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::db::repository::OrderRepository;
use crate::domain::{Order, OrderStatus};

pub struct SqlxOrderRepository {
    pool: AnyPool,
}

impl SqlxOrderRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for SqlxOrderRepository {
    /// Single atomic upsert; the `status` column only moves away from
    /// `pending` when the incoming row says so. This
    /// makes the whole operation idempotent under redelivery
    /// without needing a separate read-then-write round trip.
    async fn upsert_if_not_regressing(&self, order: &Order) -> Result<()> {
        let items_json = serde_json::to_string(&order.items)?;
        let customer_json = serde_json::to_string(&order.customer)?;

        sqlx::query(
            r#"
INSERT INTO orders
  (id, display_id, items_json, total_price, final_price, is_pickup,
   customer_json, created_at, visible_at, slot_id, slot_start, status)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
  display_id = excluded.display_id,
  items_json = excluded.items_json,
  total_price = excluded.total_price,
  final_price = excluded.final_price,
  is_pickup = excluded.is_pickup,
  customer_json = excluded.customer_json,
  created_at = excluded.created_at,
  visible_at = excluded.visible_at,
  slot_id = excluded.slot_id,
  slot_start = excluded.slot_start,
  status = CASE WHEN orders.status = 'pending' THEN excluded.status ELSE orders.status END;
"#,
        )
        .bind(order.id.to_string())
        .bind(&order.display_id)
        .bind(items_json)
        .bind(order.total_price)
        .bind(order.final_price)
        .bind(order.is_pickup)
        .bind(customer_json)
        .bind(order.created_at.to_rfc3339())
        .bind(order.visible_at.to_rfc3339())
        .bind(&order.slot_id)
        .bind(order.slot_start.to_rfc3339())
        .bind(order.status.as_str())
        .execute(&self.pool)
        .await
        .context("upserting order")?;

        Ok(())
    }

    async fn fetch_by_id(&self, id: &Uuid) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?;")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_order(&r)).transpose()
    }

    async fn fetch_by_statuses(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM orders WHERE status IN ({placeholders});");
        let mut q = sqlx::query(&sql);
        for s in statuses {
            q = q.bind(s.as_str());
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_order(&r) {
                Ok(o) => out.push(o),
                Err(e) => tracing::warn!(error = %e, "skipping malformed order row in bootstrap"),
            }
        }
        Ok(out)
    }

    async fn compare_and_set_accepted(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE orders SET status = 'accepted' WHERE id = ? AND status = 'pending';"#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn archive(&self, id: &Uuid) -> Result<()> {
        sqlx::query(r#"UPDATE orders SET status = 'archived' WHERE id = ?;"#)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_dead_letter(&self, partition: i32, offset: i64, reason: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO dead_letters (partition_no, log_offset, reason, recorded_at)
VALUES (?, ?, ?, ?)
ON CONFLICT (partition_no, log_offset) DO NOTHING;"#,
        )
        .bind(partition)
        .bind(offset)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_order(r: &sqlx::any::AnyRow) -> Result<Order> {
    let id = Uuid::parse_str(&r.get::<String, _>("id")).context("invalid order id")?;
    let items = serde_json::from_str(&r.get::<String, _>("items_json"))
        .context("invalid items_json")?;
    let customer = serde_json::from_str(&r.get::<String, _>("customer_json"))
        .context("invalid customer_json")?;
    let status = OrderStatus::parse(&r.get::<String, _>("status"))
        .ok_or_else(|| anyhow!("unknown order status in row"))?;

    Ok(Order {
        id,
        display_id: r.get("display_id"),
        items,
        total_price: r.get("total_price"),
        final_price: r.get("final_price"),
        is_pickup: r.get("is_pickup"),
        customer,
        created_at: parse_instant(&r.get::<String, _>("created_at"))?,
        visible_at: parse_instant(&r.get::<String, _>("visible_at"))?,
        slot_id: r.get("slot_id"),
        slot_start: parse_instant(&r.get::<String, _>("slot_start"))?,
        status,
    })
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
