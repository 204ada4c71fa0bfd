use sqlx::AnyPool;

/// Relational schema. `orders` is the authoritative
/// record; the KV sets (`orders:active`, `orders:pending_slots`,
/// `orders:archive`) are derived indexes rebuildable from this table alone.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS orders (
  id TEXT PRIMARY KEY,
  display_id TEXT NOT NULL,
  items_json TEXT NOT NULL,
  total_price BIGINT NOT NULL,
  final_price BIGINT NOT NULL,
  is_pickup BOOLEAN NOT NULL,
  customer_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  visible_at TEXT NOT NULL,
  slot_id TEXT NOT NULL,
  slot_start TEXT NOT NULL,
  status TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);"#)
        .execute(pool)
        .await?;
    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_orders_slot ON orders(slot_id);"#)
        .execute(pool)
        .await?;

    // Dead-letter index for decode failures, kept in
    // DB as well as the KV list so it survives a KV flush. No surrogate
    // key: (partition_no, log_offset) already identifies the record, and
    // auto-increment syntax differs across the `Any` driver's backends.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS dead_letters (
  partition_no INTEGER NOT NULL,
  log_offset BIGINT NOT NULL,
  reason TEXT NOT NULL,
  recorded_at TEXT NOT NULL,
  PRIMARY KEY (partition_no, log_offset)
);
"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
