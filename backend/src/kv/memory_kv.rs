use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AdmissionOutcome, CapacitySetOutcome, KvStore, disabled_key, load_key, max_key, plan_key};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, Entry>,
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-process stand-in for the KV store, used by unit and property tests
/// so the slot-admission/embargo invariants can be checked
/// without a running Redis. Replicates the exact semantics of the Lua
/// scripts in `redis_kv.rs`, including the capacity/disabled ordering.
pub struct MemoryKv {
    inner: Mutex<Inner>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn get_raw(inner: &mut Inner, key: &str) -> Option<String> {
        match inner.strings.get(key) {
            Some(e) => {
                if let Some(exp) = e.expires_at {
                    if Instant::now() >= exp {
                        inner.strings.remove(key);
                        return None;
                    }
                }
                Some(e.value.clone())
            }
            None => None,
        }
    }

    fn get_i64(inner: &mut Inner, key: &str, default: i64) -> i64 {
        Self::get_raw(inner, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(Self::get_raw(&mut self.inner.lock(), key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut inner = self.inner.lock();
        if Self::get_raw(&mut inner, key).is_some() {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.strings.remove(key);
        inner.sets.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.inner
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(s) = self.inner.lock().sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<i64> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.len() as i64)
            .unwrap_or(0))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let norm = |i: i64| -> i64 {
            if i < 0 { (len + i).max(0) } else { i.min(len) }
        };
        let (s, e) = (norm(start), norm(stop));
        if s > e || len == 0 {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(s as usize)
            .take((e - s + 1) as usize)
            .cloned()
            .collect())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        let v = Self::get_i64(&mut inner, key, 0) + 1;
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: v.to_string(),
                expires_at: None,
            },
        );
        Ok(v)
    }

    async fn decr(&self, key: &str) -> Result<i64> {
        let mut inner = self.inner.lock();
        let v = Self::get_i64(&mut inner, key, 0) - 1;
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: v.to_string(),
                expires_at: None,
            },
        );
        Ok(v)
    }

    async fn publish(&self, _channel: &str, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn slot_assign(
        &self,
        slot_id: &str,
        price: i64,
        default_max_capacity: i64,
    ) -> Result<AdmissionOutcome> {
        let mut inner = self.inner.lock();
        let disabled = Self::get_raw(&mut inner, &disabled_key(slot_id)).as_deref() == Some("1");
        if disabled {
            return Ok(AdmissionOutcome::Disabled);
        }
        let load = Self::get_i64(&mut inner, &load_key(slot_id), 0);
        let max = Self::get_i64(&mut inner, &max_key(slot_id), default_max_capacity);
        if load + price > max {
            return Ok(AdmissionOutcome::Rejected);
        }
        let new_load = load + price;
        inner.strings.insert(
            load_key(slot_id),
            Entry {
                value: new_load.to_string(),
                expires_at: None,
            },
        );
        Ok(AdmissionOutcome::Accepted { new_load })
    }

    async fn slot_release(&self, slot_id: &str, amount: i64) -> Result<i64> {
        let mut inner = self.inner.lock();
        let load = Self::get_i64(&mut inner, &load_key(slot_id), 0);
        let new_load = (load - amount).max(0);
        inner.strings.insert(
            load_key(slot_id),
            Entry {
                value: new_load.to_string(),
                expires_at: None,
            },
        );
        Ok(new_load)
    }

    async fn slot_set_max_capacity(&self, slot_id: &str, cap: i64) -> Result<CapacitySetOutcome> {
        let mut inner = self.inner.lock();
        let load = Self::get_i64(&mut inner, &load_key(slot_id), 0);
        if cap < load {
            return Ok(CapacitySetOutcome::BelowCurrentLoad);
        }
        inner.strings.insert(
            max_key(slot_id),
            Entry {
                value: cap.to_string(),
                expires_at: None,
            },
        );
        Ok(CapacitySetOutcome::Ok)
    }

    async fn slot_set_plan(
        &self,
        slot_id: &str,
        delivery_plan: i64,
        pickup_plan: i64,
        default_max_capacity: i64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let max = Self::get_i64(&mut inner, &max_key(slot_id), default_max_capacity);
        if delivery_plan + pickup_plan > max {
            return Ok(false);
        }
        inner.strings.insert(
            plan_key(slot_id),
            Entry {
                value: format!("{delivery_plan},{pickup_plan}"),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn slot_set_disabled(&self, slot_id: &str, disabled: bool) -> Result<()> {
        self.inner.lock().strings.insert(
            disabled_key(slot_id),
            Entry {
                value: if disabled { "1" } else { "0" }.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn slot_load(&self, slot_id: &str) -> Result<i64> {
        Ok(Self::get_i64(&mut self.inner.lock(), &load_key(slot_id), 0))
    }

    async fn slot_max_capacity(&self, slot_id: &str, default_max_capacity: i64) -> Result<i64> {
        Ok(Self::get_i64(
            &mut self.inner.lock(),
            &max_key(slot_id),
            default_max_capacity,
        ))
    }

    async fn slot_plan(&self, slot_id: &str) -> Result<(i64, i64)> {
        let mut inner = self.inner.lock();
        Ok(match Self::get_raw(&mut inner, &plan_key(slot_id)) {
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
        let mut inner = self.inner.lock();
        Ok(Self::get_raw(&mut inner, &disabled_key(slot_id)).as_deref() == Some("1"))
    }
}
