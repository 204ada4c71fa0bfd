pub mod memory_kv;
pub mod redis_kv;

pub use memory_kv::MemoryKv;
pub use redis_kv::RedisKv;

use anyhow::Result;
use async_trait::async_trait;

/// Outcome of the slot admission script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Accepted { new_load: i64 },
    Rejected,
    Disabled,
}

/// Outcome of the capacity-set script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapacitySetOutcome {
    Ok,
    BelowCurrentLoad,
}

/// The key-value store surface this core depends on:
/// sets, lists, TTL strings, pub/sub, and the atomic scripts that back the
/// slot scheduler's admission/capacity/plan/disable operations.
///
/// Design note: every slot
/// mutation goes through one of the `slot_*` methods here, each an atomic
/// server-side script. No call site anywhere in this crate does a
/// read-modify-write against slot keys directly.
#[async_trait]
pub trait KvStore: Send + Sync {
    // ---- plain string/TTL operations ----
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    /// Writes only if absent; used for "first writer wins" keys like
    /// `order:visible_at:{id}`.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;

    // ---- sets ----
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn scard(&self, key: &str) -> Result<i64>;

    // ---- lists ----
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    // ---- advisory counters ----
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn decr(&self, key: &str) -> Result<i64>;

    // ---- pub/sub ----
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    // ---- atomic slot scripts ----
    async fn slot_assign(
        &self,
        slot_id: &str,
        price: i64,
        default_max_capacity: i64,
    ) -> Result<AdmissionOutcome>;

    async fn slot_release(&self, slot_id: &str, amount: i64) -> Result<i64>;

    async fn slot_set_max_capacity(&self, slot_id: &str, cap: i64) -> Result<CapacitySetOutcome>;

    async fn slot_set_plan(
        &self,
        slot_id: &str,
        delivery_plan: i64,
        pickup_plan: i64,
        default_max_capacity: i64,
    ) -> Result<bool>;

    async fn slot_set_disabled(&self, slot_id: &str, disabled: bool) -> Result<()>;

    async fn slot_load(&self, slot_id: &str) -> Result<i64>;
    async fn slot_max_capacity(&self, slot_id: &str, default_max_capacity: i64) -> Result<i64>;
    async fn slot_plan(&self, slot_id: &str) -> Result<(i64, i64)>;
    async fn slot_disabled(&self, slot_id: &str) -> Result<bool>;
}

pub fn load_key(slot_id: &str) -> String {
    format!("slot:{slot_id}:load")
}
pub fn max_key(slot_id: &str) -> String {
    format!("slot:{slot_id}:max")
}
pub fn disabled_key(slot_id: &str) -> String {
    format!("slot:{slot_id}:disabled")
}
pub fn plan_key(slot_id: &str) -> String {
    format!("slot:{slot_id}:plan")
}

pub fn order_key(id: &str) -> String {
    format!("order:{id}")
}
pub fn order_visible_at_key(id: &str) -> String {
    format!("order:visible_at:{id}")
}
pub fn order_slot_start_key(id: &str) -> String {
    format!("order:slot:start:{id}")
}

pub const ORDERS_ACTIVE: &str = "orders:active";
pub const ORDERS_PENDING_SLOTS: &str = "orders:pending_slots";
pub const ORDERS_ARCHIVE: &str = "orders:archive";
pub const ORDERS_PENDING_COUNTER: &str = "orders:pending";
pub const ORDERS_TOTAL_COUNTER: &str = "orders:total";
pub const ORDERS_DEAD_LETTER: &str = "orders:dead_letter";
pub const ORDER_TTL_SECS: u64 = 24 * 60 * 60;
