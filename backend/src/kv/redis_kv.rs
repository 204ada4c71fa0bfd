use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script, aio::ConnectionManager};

use super::{AdmissionOutcome, CapacitySetOutcome, KvStore, disabled_key, load_key, max_key, plan_key};

/// Atomically: read load/max/disabled, reject if disabled or over capacity,
/// else add `price` to load. Mirrors the admission script's three steps
/// exactly, inside a single atomic region.
static ADMIT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local load = tonumber(redis.call('GET', KEYS[1]) or '0')
local max_raw = redis.call('GET', KEYS[2])
local max = max_raw and tonumber(max_raw) or tonumber(ARGV[2])
local disabled = redis.call('GET', KEYS[3])
if disabled == '1' then
  return -2
end
local price = tonumber(ARGV[1])
if load + price > max then
  return -1
end
local new_load = load + price
redis.call('SET', KEYS[1], new_load)
return new_load
"#,
    )
});

/// Compensating decrement.
static RELEASE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local load = tonumber(redis.call('GET', KEYS[1]) or '0')
local amount = tonumber(ARGV[1])
local new_load = load - amount
if new_load < 0 then new_load = 0 end
redis.call('SET', KEYS[1], new_load)
return new_load
"#,
    )
});

/// `SetMaxCapacity` must not set cap below current_load.
static SET_MAX_CAPACITY_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local load = tonumber(redis.call('GET', KEYS[1]) or '0')
local cap = tonumber(ARGV[1])
if cap < load then
  return -1
end
redis.call('SET', KEYS[2], cap)
return 0
"#,
    )
});

/// `SetSlotPlan` must satisfy delivery_plan + pickup_plan <= max_capacity.
static SET_PLAN_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local max_raw = redis.call('GET', KEYS[2])
local max = max_raw and tonumber(max_raw) or tonumber(ARGV[3])
local delivery = tonumber(ARGV[1])
local pickup = tonumber(ARGV[2])
if delivery + pickup > max then
  return 0
end
redis.call('SET', KEYS[3], delivery .. ',' .. pickup)
return 1
"#,
    )
});

pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid KV_URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("connecting to KV store")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map(|r: Option<String>| r.is_some())?;
        Ok(set)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn scard(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.scard(key).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.decr(key, 1).await?)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn slot_assign(
        &self,
        slot_id: &str,
        price: i64,
        default_max_capacity: i64,
    ) -> Result<AdmissionOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = ADMIT_SCRIPT
            .key(load_key(slot_id))
            .key(max_key(slot_id))
            .key(disabled_key(slot_id))
            .arg(price)
            .arg(default_max_capacity)
            .invoke_async(&mut conn)
            .await?;

        Ok(match result {
            -2 => AdmissionOutcome::Disabled,
            -1 => AdmissionOutcome::Rejected,
            new_load => AdmissionOutcome::Accepted { new_load },
        })
    }

    async fn slot_release(&self, slot_id: &str, amount: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let new_load: i64 = RELEASE_SCRIPT
            .key(load_key(slot_id))
            .arg(amount)
            .invoke_async(&mut conn)
            .await?;
        Ok(new_load)
    }

    async fn slot_set_max_capacity(&self, slot_id: &str, cap: i64) -> Result<CapacitySetOutcome> {
        let mut conn = self.conn.clone();
        let result: i64 = SET_MAX_CAPACITY_SCRIPT
            .key(load_key(slot_id))
            .key(max_key(slot_id))
            .arg(cap)
            .invoke_async(&mut conn)
            .await?;
        Ok(if result == -1 {
            CapacitySetOutcome::BelowCurrentLoad
        } else {
            CapacitySetOutcome::Ok
        })
    }

    async fn slot_set_plan(
        &self,
        slot_id: &str,
        delivery_plan: i64,
        pickup_plan: i64,
        default_max_capacity: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ok: i64 = SET_PLAN_SCRIPT
            .key(load_key(slot_id))
            .key(max_key(slot_id))
            .key(plan_key(slot_id))
            .arg(delivery_plan)
            .arg(pickup_plan)
            .arg(default_max_capacity)
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }

    async fn slot_set_disabled(&self, slot_id: &str, disabled: bool) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(disabled_key(slot_id), if disabled { "1" } else { "0" })
            .await?;
        Ok(())
    }

    async fn slot_load(&self, slot_id: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let v: Option<i64> = conn.get(load_key(slot_id)).await?;
        Ok(v.unwrap_or(0))
    }

    async fn slot_max_capacity(&self, slot_id: &str, default_max_capacity: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let v: Option<i64> = conn.get(max_key(slot_id)).await?;
        Ok(v.unwrap_or(default_max_capacity))
    }

    async fn slot_plan(&self, slot_id: &str) -> Result<(i64, i64)> {
        let mut conn = self.conn.clone();
        let v: Option<String> = conn.get(plan_key(slot_id)).await?;
        Ok(match v {
            Some(s) => {
                let mut parts = s.splitn(2, ',');
                let d = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                let p = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                (d, p)
            }
            None => (0, 0),
        })
    }

    async fn slot_disabled(&self, slot_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let v: Option<String> = conn.get(disabled_key(slot_id)).await?;
        Ok(v.as_deref() == Some("1"))
    }
}
