use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::instrument;

use crate::clock::Clock;
use crate::domain::slot::{SLOT_WIDTH_MINUTES, SlotSnapshot, floor_15};
use crate::domain::{BusinessHours, SlotId};
use crate::error::AppError;
use crate::kv::{AdmissionOutcome, CapacitySetOutcome, KvStore};

/// The mutable half of scheduler config: business hours and the default
/// per-slot capacity used when a slot has no explicit `SetMaxCapacity` on
/// record. Behind a single `RwLock` so `GET /slots/config` /
/// `PUT /slots/config` can change it without touching the
/// slot capacity state itself, which always lives in the KV store.
#[derive(Clone, Copy, Debug)]
pub struct SlotsConfig {
    pub business_hours: BusinessHours,
    pub default_capacity: i64,
}

/// C1: capacity-based admission to 15-minute production slots.
///
/// Every mutation of slot state goes through the KV store's atomic scripts;
/// this type never does a local read-modify-write against slot keys.
pub struct SlotScheduler {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: RwLock<SlotsConfig>,
}

impl SlotScheduler {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        business_hours: BusinessHours,
        default_capacity: i64,
    ) -> Self {
        Self {
            kv,
            clock,
            config: RwLock::new(SlotsConfig {
                business_hours,
                default_capacity,
            }),
        }
    }

    pub fn config(&self) -> SlotsConfig {
        *self.config.read()
    }

    pub fn set_config(&self, cfg: SlotsConfig) {
        *self.config.write() = cfg;
    }

    /// `AssignSlot(order_price, preferred_time) -> (slot_id, slot_start) | error`.
    /// Scans candidate slots in strictly increasing
    /// `start_time`, admitting into the first one with headroom.
    #[instrument(skip(self), fields(order_price))]
    pub async fn assign_slot(
        &self,
        order_price: i64,
        preferred_time: DateTime<Utc>,
    ) -> Result<(SlotId, DateTime<Utc>), AppError> {
        if order_price <= 0 {
            return Err(AppError::invalid("order_price", "must be positive"));
        }

        let cfg = self.config();
        let close = cfg.business_hours.close_for(preferred_time);
        if preferred_time >= close {
            return Err(AppError::OutsideBusinessHours);
        }

        let mut candidate = floor_15(preferred_time);
        let mut seen_in_hours = 0u32;
        let mut disabled_count = 0u32;
        let mut last_slot_id: Option<String> = None;

        while candidate < close {
            if !cfg.business_hours.contains(candidate) {
                candidate += Duration::minutes(SLOT_WIDTH_MINUTES);
                continue;
            }

            seen_in_hours += 1;
            let slot_id = SlotId::from_start(candidate);
            last_slot_id = Some(slot_id.0.clone());

            let outcome = self
                .kv
                .slot_assign(&slot_id.0, order_price, cfg.default_capacity)
                .await
                .map_err(|e| AppError::TransientDownstream(e.to_string()))?;

            match outcome {
                AdmissionOutcome::Accepted { .. } => {
                    return Ok((slot_id, candidate));
                }
                AdmissionOutcome::Disabled => {
                    disabled_count += 1;
                }
                AdmissionOutcome::Rejected => {}
            }

            candidate += Duration::minutes(SLOT_WIDTH_MINUTES);
        }

        if seen_in_hours > 0 && disabled_count == seen_in_hours {
            return Err(AppError::Disabled(
                last_slot_id.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        Err(AppError::NoCapacity)
    }

    /// Compensating decrement used only by the intake failure path.
    pub async fn release_slot(&self, slot_id: &SlotId, amount: i64) -> Result<i64, AppError> {
        self.kv
            .slot_release(&slot_id.0, amount)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))
    }

    pub async fn set_max_capacity(&self, slot_id: &SlotId, cap: i64) -> Result<(), AppError> {
        match self
            .kv
            .slot_set_max_capacity(&slot_id.0, cap)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?
        {
            CapacitySetOutcome::Ok => Ok(()),
            CapacitySetOutcome::BelowCurrentLoad => Err(AppError::invalid(
                "max_capacity",
                "must not be below current_load",
            )),
        }
    }

    pub async fn set_slot_plan(
        &self,
        slot_id: &SlotId,
        delivery_plan: i64,
        pickup_plan: i64,
    ) -> Result<(), AppError> {
        let ok = self
            .kv
            .slot_set_plan(&slot_id.0, delivery_plan, pickup_plan, self.config().default_capacity)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
        if ok {
            Ok(())
        } else {
            Err(AppError::invalid(
                "plan",
                "delivery_plan + pickup_plan must not exceed max_capacity",
            ))
        }
    }

    pub async fn set_slot_disabled(&self, slot_id: &SlotId, disabled: bool) -> Result<(), AppError> {
        self.kv
            .slot_set_disabled(&slot_id.0, disabled)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))
    }

    pub async fn get_slot_info(&self, slot_id: &SlotId) -> Result<SlotSnapshot, AppError> {
        self.snapshot_of(slot_id).await
    }

    /// `GetAllSlots(range)`; materialised eagerly as a `Vec` here (a true
    /// lazy/streaming cursor is unnecessary at this crate's scale, a
    /// business day has at most 96 fifteen-minute slots).
    pub async fn get_all_slots(
        &self,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<Vec<SlotSnapshot>, AppError> {
        let mut out = Vec::new();
        let mut cursor = floor_15(range_start);
        while cursor < range_end {
            let slot_id = SlotId::from_start(cursor);
            out.push(self.snapshot_of(&slot_id).await?);
            cursor += Duration::minutes(SLOT_WIDTH_MINUTES);
        }
        Ok(out)
    }

    async fn snapshot_of(&self, slot_id: &SlotId) -> Result<SlotSnapshot, AppError> {
        let start_time = parse_slot_start(&slot_id.0)?;
        let current_load = self
            .kv
            .slot_load(&slot_id.0)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
        let max_capacity = self
            .kv
            .slot_max_capacity(&slot_id.0, self.config().default_capacity)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
        let (delivery_plan, pickup_plan) = self
            .kv
            .slot_plan(&slot_id.0)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
        let disabled = self
            .kv
            .slot_disabled(&slot_id.0)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;

        Ok(SlotSnapshot {
            slot_id: slot_id.clone(),
            start_time,
            end_time: SlotSnapshot::end_time_of(start_time),
            max_capacity,
            delivery_plan,
            pickup_plan,
            current_load,
            disabled,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn parse_slot_start(slot_id: &str) -> Result<DateTime<Utc>, AppError> {
    let naive = chrono::NaiveDateTime::parse_from_str(slot_id, "%Y%m%dT%H%M")
        .map_err(|e| AppError::invalid("slot_id", e.to_string()))?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::kv::MemoryKv;
    use chrono::TimeZone;

    fn scheduler() -> SlotScheduler {
        SlotScheduler::new(
            Arc::new(MemoryKv::new()),
            Arc::new(TestClock::new(Utc::now())),
            BusinessHours {
                open_h: 9,
                open_m: 0,
                close_h: 23,
                close_m: 45,
            },
            10_000,
        )
    }

    // S1: admit into empty slot.
    #[tokio::test]
    async fn s1_admit_into_empty_slot() {
        let sched = scheduler();
        let preferred = Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap();
        let (slot_id, slot_start) = sched.assign_slot(748, preferred).await.unwrap();
        assert_eq!(slot_start, Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        assert_eq!(slot_id.0, "20260301T0900");
        let snap = sched.get_slot_info(&slot_id).await.unwrap();
        assert_eq!(snap.current_load, 748);
    }

    // S2: capacity overflow tips into next slot.
    #[tokio::test]
    async fn s2_overflow_tips_into_next_slot() {
        let sched = scheduler();
        let first = SlotId::from_start(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        sched.set_max_capacity(&first, 10_000).await.unwrap();
        sched
            .assign_slot(9_700, Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap())
            .await
            .unwrap();

        let (slot_id, slot_start) = sched
            .assign_slot(500, Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(slot_start, Utc.with_ymd_and_hms(2026, 3, 1, 9, 15, 0).unwrap());
        assert_eq!(slot_id.0, "20260301T0915");

        let snap0 = sched.get_slot_info(&first).await.unwrap();
        assert_eq!(snap0.current_load, 9_700);
    }

    // S3: disabled slot skipped.
    #[tokio::test]
    async fn s3_disabled_slot_skipped() {
        let sched = scheduler();
        let first = SlotId::from_start(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
        sched.set_slot_disabled(&first, true).await.unwrap();

        let (slot_id, slot_start) = sched
            .assign_slot(100, Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(slot_start, Utc.with_ymd_and_hms(2026, 3, 1, 9, 15, 0).unwrap());
        assert_eq!(slot_id.0, "20260301T0915");
    }

    #[tokio::test]
    async fn outside_business_hours_rejected() {
        let sched = scheduler();
        let err = sched
            .assign_slot(100, Utc.with_ymd_and_hms(2026, 3, 1, 23, 50, 0).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OutsideBusinessHours));
    }

    #[tokio::test]
    async fn release_slot_decrements_load_and_floors_at_zero() {
        let sched = scheduler();
        let preferred = Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap();
        let (slot_id, _) = sched.assign_slot(500, preferred).await.unwrap();
        sched.release_slot(&slot_id, 500).await.unwrap();
        let snap = sched.get_slot_info(&slot_id).await.unwrap();
        assert_eq!(snap.current_load, 0);

        sched.release_slot(&slot_id, 500).await.unwrap();
        let snap2 = sched.get_slot_info(&slot_id).await.unwrap();
        assert_eq!(snap2.current_load, 0);
    }

    #[tokio::test]
    async fn set_max_capacity_rejects_below_current_load() {
        let sched = scheduler();
        let preferred = Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap();
        let (slot_id, _) = sched.assign_slot(5_000, preferred).await.unwrap();
        let err = sched.set_max_capacity(&slot_id, 1_000).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest { .. }));
    }
}
