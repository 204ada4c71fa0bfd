pub mod menu;
pub mod validation;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::slot::EMBARGO_MINUTES;
use crate::domain::{Order, OrderStatus};
use crate::error::AppError;
use crate::eventlog::{EventLog, codec};
use crate::kv::KvStore;
use crate::slot_scheduler::SlotScheduler;

use menu::MenuSnapshot;

#[derive(Clone, Debug)]
pub struct LineItemRequest {
    pub sku: String,
    pub quantity: u32,
    pub extras: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct CustomerRequest {
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub delivery_address: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CreateOrderRequest {
    pub items: Vec<LineItemRequest>,
    pub total_price: i64,
    pub final_price: i64,
    /// Declared discount, in minor units.
    pub discount: i64,
    pub is_pickup: bool,
    pub customer: CustomerRequest,
}

#[derive(Clone, Debug)]
pub struct CreateOrderResponse {
    pub id: Uuid,
    pub display_id: String,
    pub slot_start: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
}

/// C2: validates a submitted order, assigns a slot, and persists the event
/// to the log. No side effect outside the log on success; no
/// side effect at all on validation failure.
pub struct Intake {
    scheduler: Arc<SlotScheduler>,
    kv: Arc<dyn KvStore>,
    event_log: Arc<dyn EventLog>,
    menu: Arc<dyn MenuSnapshot>,
    clock: Arc<dyn Clock>,
}

impl Intake {
    pub fn new(
        scheduler: Arc<SlotScheduler>,
        kv: Arc<dyn KvStore>,
        event_log: Arc<dyn EventLog>,
        menu: Arc<dyn MenuSnapshot>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            kv,
            event_log,
            menu,
            clock,
        }
    }

    #[instrument(skip(self, request))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, AppError> {
        // Step 1: validate. No slot reservation on failure.
        let items = validation::validate_and_price(&request, self.menu.as_ref())?;

        // Step 2: generate identifiers.
        let id = Uuid::new_v4();
        let now = self.clock.now();
        let display_id = self.next_display_id(now).await?;

        // Step 3: assign a slot. No compensation needed: no reservation
        // happened if this fails.
        let (slot_id, slot_start) = self
            .scheduler
            .assign_slot(request.final_price, now)
            .await?;

        // Everything past this point has made a reservation; any failure
        // must release it.
        match self
            .finish_admission(id, &display_id, items, &request, now, &slot_id, slot_start)
            .await
        {
            Ok(resp) => Ok(resp),
            Err(e) => {
                if let Err(release_err) = self
                    .scheduler
                    .release_slot(&slot_id, request.final_price)
                    .await
                {
                    tracing::error!(error = %release_err, "failed to release reserved slot capacity after admission failure");
                }
                Err(AppError::AdmissionFailed(e.to_string()))
            }
        }
    }

    async fn finish_admission(
        &self,
        id: Uuid,
        display_id: &str,
        items: Vec<crate::domain::order::LineItem>,
        request: &CreateOrderRequest,
        now: DateTime<Utc>,
        slot_id: &crate::domain::SlotId,
        slot_start: DateTime<Utc>,
    ) -> Result<CreateOrderResponse, AppError> {
        // Step 4: visible_at = max(slot_start - 15min, now), never earlier
        // than created_at.
        let visible_at = (slot_start - Duration::minutes(EMBARGO_MINUTES)).max(now);

        let order = Order {
            id,
            display_id: display_id.to_string(),
            items,
            total_price: request.total_price,
            final_price: request.final_price,
            is_pickup: request.is_pickup,
            customer: validation::build_customer(&request.customer),
            created_at: now,
            visible_at,
            slot_id: slot_id.0.clone(),
            slot_start,
            status: OrderStatus::Pending,
        };

        // Step 5: serialise using the schema-versioned binary encoding.
        let bytes = codec::encode_v1(&order)
            .map_err(|e| AppError::AdmissionFailed(e.to_string()))?;

        // Step 6: append to the event log, keyed by id (stable partitioning).
        self.event_log
            .append(order.id.as_bytes(), bytes)
            .await
            .map_err(|e| AppError::AdmissionFailed(e.to_string()))?;

        // Step 7: return the public tuple. No customer-facing id is ever
        // returned unless the append above has been acknowledged.
        Ok(CreateOrderResponse {
            id: order.id,
            display_id: order.display_id,
            slot_start: order.slot_start,
            visible_at: order.visible_at,
        })
    }

    /// Monotonic per-business-day counter guarded by the KV store.
    async fn next_display_id(&self, now: DateTime<Utc>) -> Result<String, AppError> {
        let day = now.format("%Y%m%d");
        let key = format!("display_id_counter:{day}");
        let n = self
            .kv
            .incr(&key)
            .await
            .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
        Ok(format!("{day}-{n:04}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::domain::BusinessHours;
    use crate::eventlog::MemoryEventLog;
    use crate::intake::menu::StaticMenu;
    use crate::kv::MemoryKv;
    use chrono::TimeZone;

    fn intake_with_clock(
        clock: Arc<TestClock>,
    ) -> (Intake, Arc<MemoryEventLog>, Arc<SlotScheduler>) {
        let kv = Arc::new(MemoryKv::new());
        let log = Arc::new(MemoryEventLog::new());
        let scheduler = Arc::new(SlotScheduler::new(
            kv.clone(),
            clock.clone(),
            BusinessHours {
                open_h: 9,
                open_m: 0,
                close_h: 23,
                close_m: 45,
            },
            10_000,
        ));
        let menu = Arc::new(StaticMenu::new([("margherita".to_string(), 1000i64)]));
        (
            Intake::new(scheduler.clone(), kv, log.clone(), menu, clock),
            log,
            scheduler,
        )
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            items: vec![LineItemRequest {
                sku: "margherita".into(),
                quantity: 1,
                extras: vec![],
            }],
            total_price: 1000,
            final_price: 1000,
            discount: 0,
            is_pickup: true,
            customer: CustomerRequest {
                phone: "15551234567".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                delivery_address: None,
            },
        }
    }

    #[tokio::test]
    async fn creates_an_order_and_appends_exactly_one_event() {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
        ));
        let (intake, log, _scheduler) = intake_with_clock(clock);
        let resp = intake.create_order(request()).await.unwrap();
        assert_eq!(
            resp.slot_start,
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn visible_at_is_clipped_to_now_when_slot_already_open() {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
        ));
        let (intake, _log, _scheduler) = intake_with_clock(clock);
        let resp = intake.create_order(request()).await.unwrap();
        assert_eq!(
            resp.visible_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn validation_failure_appends_nothing() {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
        ));
        let (intake, log, _scheduler) = intake_with_clock(clock);
        let mut bad = request();
        bad.items.clear();
        assert!(intake.create_order(bad).await.is_err());
        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn display_ids_are_monotonic_within_a_day() {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
        ));
        let (intake, _log, _scheduler) = intake_with_clock(clock);
        let a = intake.create_order(request()).await.unwrap();
        let b = intake.create_order(request()).await.unwrap();
        assert_ne!(a.display_id, b.display_id);
    }

    // P2: a reservation that never makes it into the log must not linger.
    #[tokio::test]
    async fn log_append_failure_releases_the_reserved_slot_capacity() {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
        ));
        let (intake, log, scheduler) = intake_with_clock(clock);
        log.set_fail_appends(true);

        let err = intake.create_order(request()).await.unwrap_err();
        assert!(matches!(err, AppError::AdmissionFailed(_)));
        assert_eq!(log.len(), 0);

        let slot_id = crate::domain::SlotId::from_start(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        );
        let snap = scheduler.get_slot_info(&slot_id).await.unwrap();
        assert_eq!(snap.current_load, 0);
    }

    #[tokio::test]
    async fn log_append_failure_does_not_block_a_later_successful_order() {
        let clock = Arc::new(TestClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
        ));
        let (intake, log, _scheduler) = intake_with_clock(clock);
        log.set_fail_appends(true);
        assert!(intake.create_order(request()).await.is_err());

        log.set_fail_appends(false);
        let resp = intake.create_order(request()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            resp.slot_start,
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::clock::TestClock;
    use crate::domain::BusinessHours;
    use crate::eventlog::MemoryEventLog;
    use crate::intake::menu::StaticMenu;
    use crate::kv::MemoryKv;
    use chrono::TimeZone;
    use proptest::prelude::*;

    // P2: net current_load returns to its pre-call value whenever
    // AssignSlot succeeds but the log append that follows it fails,
    // regardless of the submitted price.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn reservation_is_always_released_on_append_failure(price in 1..10_000i64) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let load_after = rt.block_on(async move {
                let clock = Arc::new(TestClock::new(
                    Utc.with_ymd_and_hms(2026, 3, 1, 9, 2, 0).unwrap(),
                ));
                let kv = Arc::new(MemoryKv::new());
                let log = Arc::new(MemoryEventLog::new());
                let scheduler = Arc::new(SlotScheduler::new(
                    kv.clone(),
                    clock.clone(),
                    BusinessHours { open_h: 9, open_m: 0, close_h: 23, close_m: 45 },
                    10_000,
                ));
                let menu = Arc::new(StaticMenu::new([("margherita".to_string(), 1000i64)]));
                let intake = Intake::new(scheduler.clone(), kv, log.clone(), menu, clock);

                let req = CreateOrderRequest {
                    items: vec![LineItemRequest {
                        sku: "margherita".into(),
                        quantity: 1,
                        extras: vec![],
                    }],
                    total_price: price,
                    final_price: price,
                    discount: 0,
                    is_pickup: true,
                    customer: CustomerRequest {
                        phone: "15551234567".into(),
                        first_name: "Ada".into(),
                        last_name: "Lovelace".into(),
                        delivery_address: None,
                    },
                };

                log.set_fail_appends(true);
                let _ = intake.create_order(req).await;

                let slot_id = crate::domain::SlotId::from_start(
                    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
                );
                scheduler.get_slot_info(&slot_id).await.unwrap().current_load
            });

            prop_assert_eq!(load_after, 0);
        }
    }
}
