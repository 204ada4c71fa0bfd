use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Width of a production slot.
pub const SLOT_WIDTH_MINUTES: i64 = 15;

/// Embargo horizon. Kept literal per Open Questions: a future
/// per-slot override would live on `Slot`, not here.
pub const EMBARGO_MINUTES: i64 = 15;

/// Canonical, lexicographically-sortable slot identifier derived from
/// `slot_start`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub String);

impl SlotId {
    pub fn from_start(start: DateTime<Utc>) -> Self {
        SlotId(start.format("%Y%m%dT%H%M").to_string())
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Floors `when` to the nearest 15-minute boundary, UTC.
pub fn floor_15(when: DateTime<Utc>) -> DateTime<Utc> {
    let minute = when.minute() as i64;
    let floored_minute = (minute / SLOT_WIDTH_MINUTES) * SLOT_WIDTH_MINUTES;
    when.with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap()
        + Duration::minutes(floored_minute)
}

#[derive(Clone, Copy, Debug)]
pub struct BusinessHours {
    pub open_h: u32,
    pub open_m: u32,
    pub close_h: u32,
    pub close_m: u32,
}

impl BusinessHours {
    /// A slot is admissible iff its start_time lies in the half-open window
    /// [open, close) of the order's local business day.
    pub fn contains(&self, start: DateTime<Utc>) -> bool {
        let open = start
            .with_hour(self.open_h)
            .unwrap()
            .with_minute(self.open_m)
            .unwrap()
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap();
        let close = start
            .with_hour(self.close_h)
            .unwrap()
            .with_minute(self.close_m)
            .unwrap()
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap();
        start >= open && start < close
    }

    /// The close instant for the business day containing `when`.
    pub fn close_for(&self, when: DateTime<Utc>) -> DateTime<Utc> {
        when.with_hour(self.close_h)
            .unwrap()
            .with_minute(self.close_m)
            .unwrap()
            .with_second(0)
            .unwrap()
            .with_nanosecond(0)
            .unwrap()
    }
}

/// Read-only view of a slot's capacity state, returned by `GetSlotInfo` /
/// `GetAllSlots`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub slot_id: SlotId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_capacity: i64,
    pub delivery_plan: i64,
    pub pickup_plan: i64,
    pub current_load: i64,
    pub disabled: bool,
}

impl SlotSnapshot {
    pub fn end_time_of(start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::minutes(SLOT_WIDTH_MINUTES)
    }
}
