use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::repository::OrderRepository;
use crate::domain::{Order, SlotId};
use crate::error::AppError;
use crate::fanout::{self, FanOut, Role};
use crate::kv::{KvStore, ORDERS_ACTIVE, ORDERS_ARCHIVE, order_key, order_slot_start_key};
use crate::slot_scheduler::{SlotScheduler, SlotsConfig};

/// HTTP egress for dashboards and kitchen tablets. This is the
/// surface through which the core's contracts (embargo promotion,
/// role-filtered projection, slot administration) become externally
/// observable; everything it does is a thin read/write over C1/C4.
#[derive(Clone)]
pub struct HttpState {
    pub fanout: Arc<FanOut>,
    pub scheduler: Arc<SlotScheduler>,
    pub kv: Arc<dyn KvStore>,
    pub db: Arc<dyn OrderRepository>,
    pub clock: Arc<dyn Clock>,
    pub ready: Arc<AtomicBool>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NoCapacity | AppError::Disabled(_) | AppError::OutsideBusinessHours => {
                StatusCode::CONFLICT
            }
            AppError::AdmissionFailed(_) | AppError::TransientDownstream(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::DataCorrupted(_) | AppError::FatalDownstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    reason: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = match &self {
            AppError::InvalidRequest { .. } => "invalid_request",
            AppError::NoCapacity => "no_capacity",
            AppError::Disabled(_) => "disabled",
            AppError::OutsideBusinessHours => "outside_business_hours",
            AppError::AdmissionFailed(_) => "admission_failed",
            AppError::TransientDownstream(_) => "transient_downstream",
            AppError::DataCorrupted(_) => "data_corrupted",
            AppError::FatalDownstream(_) => "fatal_downstream",
        };
        let body = ErrorBody {
            kind,
            reason: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/orders", get(list_active))
        .route("/orders/pending", get(list_pending))
        .route("/orders/:id/ready", post(mark_ready))
        .route("/slots", get(list_slots))
        .route(
            "/slots/config",
            get(get_slots_config).put(put_slots_config),
        )
        .route("/slots/:slot_id/disabled", post(set_disabled))
        .route("/slots/:slot_id/capacity", put(set_capacity))
        .route("/slots/:slot_id/plan", put(set_plan))
        .route("/slots/plan", put(set_plan_batch))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Ready once BOOT has completed and the materialiser's consumer has
/// joined its group.
async fn readyz(State(state): State<HttpState>) -> StatusCode {
    if state.ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Deserialize)]
struct RoleQuery {
    role: Option<String>,
}

fn role_of(q: &RoleQuery) -> Role {
    q.role.as_deref().map(Role::parse).unwrap_or(Role::Default)
}

#[derive(Serialize)]
struct OrdersResponse {
    orders: Vec<Order>,
    count: usize,
}

/// `GET /orders?role=...`: triggers an embargo promotion pass before
/// reading `orders:active`.
async fn list_active(
    State(state): State<HttpState>,
    Query(q): Query<RoleQuery>,
) -> Result<Json<OrdersResponse>, AppError> {
    fanout::promote_pass(
        state.db.as_ref(),
        state.kv.as_ref(),
        state.fanout.as_ref(),
        state.clock.as_ref(),
    )
    .await
    .map_err(|e| AppError::TransientDownstream(e.to_string()))?;

    let orders = state
        .fanout
        .active_orders(role_of(&q))
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    Ok(Json(OrdersResponse {
        count: orders.len(),
        orders,
    }))
}

/// `GET /orders/pending?role=...`: projection over `orders:pending_slots`,
/// no promotion side effect.
async fn list_pending(
    State(state): State<HttpState>,
    Query(q): Query<RoleQuery>,
) -> Result<Json<OrdersResponse>, AppError> {
    let orders = state
        .fanout
        .pending_orders(role_of(&q))
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    Ok(Json(OrdersResponse {
        count: orders.len(),
        orders,
    }))
}

/// `POST /orders/{id}/ready`: removes the order from
/// `orders:active`, archives it, deletes its per-order cache keys, and
/// publishes `order_processed`.
async fn mark_ready(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let id_str = id.to_string();
    state
        .kv
        .srem(ORDERS_ACTIVE, &id_str)
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    state
        .kv
        .rpush(ORDERS_ARCHIVE, &id_str)
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    state
        .db
        .archive(&id)
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    state
        .kv
        .del(&order_key(&id_str))
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    state
        .kv
        .del(&order_slot_start_key(&id_str))
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    state
        .kv
        .publish("order_processed", &id_str)
        .await
        .map_err(|e| AppError::TransientDownstream(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct SlotsResponse {
    slots: Vec<crate::domain::slot::SlotSnapshot>,
}

/// `GET /slots`: today's business-hours slots.
async fn list_slots(State(state): State<HttpState>) -> Result<Json<SlotsResponse>, AppError> {
    let now = state.clock.now();
    let cfg = state.scheduler.config();
    let close = cfg.business_hours.close_for(now);
    let slots = state.scheduler.get_all_slots(now, close).await?;
    Ok(Json(SlotsResponse { slots }))
}

#[derive(Serialize)]
struct SlotsConfigBody {
    open_h: u32,
    open_m: u32,
    close_h: u32,
    close_m: u32,
    default_capacity: i64,
}

async fn get_slots_config(State(state): State<HttpState>) -> Json<SlotsConfigBody> {
    let cfg = state.scheduler.config();
    Json(SlotsConfigBody {
        open_h: cfg.business_hours.open_h,
        open_m: cfg.business_hours.open_m,
        close_h: cfg.business_hours.close_h,
        close_m: cfg.business_hours.close_m,
        default_capacity: cfg.default_capacity,
    })
}

async fn put_slots_config(
    State(state): State<HttpState>,
    Json(body): Json<SlotsConfigBody>,
) -> StatusCode {
    state.scheduler.set_config(SlotsConfig {
        business_hours: crate::domain::BusinessHours {
            open_h: body.open_h,
            open_m: body.open_m,
            close_h: body.close_h,
            close_m: body.close_m,
        },
        default_capacity: body.default_capacity,
    });
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct DisabledBody {
    disabled: bool,
}

async fn set_disabled(
    State(state): State<HttpState>,
    Path(slot_id): Path<String>,
    Json(body): Json<DisabledBody>,
) -> Result<StatusCode, AppError> {
    state
        .scheduler
        .set_slot_disabled(&SlotId(slot_id), body.disabled)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CapacityBody {
    max_capacity: i64,
}

async fn set_capacity(
    State(state): State<HttpState>,
    Path(slot_id): Path<String>,
    Json(body): Json<CapacityBody>,
) -> Result<StatusCode, AppError> {
    state
        .scheduler
        .set_max_capacity(&SlotId(slot_id), body.max_capacity)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PlanBody {
    delivery_plan: i64,
    pickup_plan: i64,
}

async fn set_plan(
    State(state): State<HttpState>,
    Path(slot_id): Path<String>,
    Json(body): Json<PlanBody>,
) -> Result<StatusCode, AppError> {
    state
        .scheduler
        .set_slot_plan(&SlotId(slot_id), body.delivery_plan, body.pickup_plan)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PlanBatchEntry {
    slot_id: String,
    delivery_plan: i64,
    pickup_plan: i64,
}

#[derive(Deserialize)]
struct PlanBatchBody {
    plans: Vec<PlanBatchEntry>,
}

/// `PUT /slots/plan`. Applies each entry independently;
/// a single bad entry does not roll back the others.
async fn set_plan_batch(
    State(state): State<HttpState>,
    Json(body): Json<PlanBatchBody>,
) -> Json<Vec<bool>> {
    let mut results = Vec::with_capacity(body.plans.len());
    for entry in body.plans {
        let ok = state
            .scheduler
            .set_slot_plan(&SlotId(entry.slot_id), entry.delivery_plan, entry.pickup_plan)
            .await
            .is_ok();
        results.push(ok);
    }
    Json(results)
}
