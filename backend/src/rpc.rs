use std::sync::atomic::Ordering;

use tonic::{Request, Response, Status};

use crate::error::AppError;
use crate::intake::{CreateOrderResponse as CoreResponse, CustomerRequest, Intake, LineItemRequest};
use crate::metrics::Counters;

pub mod proto {
    tonic::include_proto!("orders");
}

use proto::order_intake_server::{OrderIntake, OrderIntakeServer};
use proto::{CreateOrderRequest, CreateOrderResponse};

/// RPC ingress. Thin
/// transport wrapper: all domain logic lives in `Intake`.
pub struct OrderIntakeService {
    intake: Intake,
    counters: Counters,
}

impl OrderIntakeService {
    pub fn new(intake: Intake, counters: Counters) -> Self {
        Self { intake, counters }
    }

    pub fn into_server(self) -> OrderIntakeServer<Self> {
        OrderIntakeServer::new(self)
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidRequest { .. }
            | AppError::NoCapacity
            | AppError::Disabled(_)
            | AppError::OutsideBusinessHours => Status::invalid_argument(err.to_string()),
            AppError::AdmissionFailed(_) | AppError::TransientDownstream(_) => {
                Status::unavailable(err.to_string())
            }
            AppError::DataCorrupted(_) | AppError::FatalDownstream(_) => {
                Status::internal(err.to_string())
            }
        }
    }
}

#[tonic::async_trait]
impl OrderIntake for OrderIntakeService {
    async fn create_order(
        &self,
        request: Request<CreateOrderRequest>,
    ) -> Result<Response<CreateOrderResponse>, Status> {
        let req = request.into_inner();
        let core_req = to_core_request(req)?;

        let resp: CoreResponse = match self.intake.create_order(core_req).await {
            Ok(resp) => {
                self.counters.orders_created.fetch_add(1, Ordering::Relaxed);
                resp
            }
            Err(e) => {
                match &e {
                    AppError::NoCapacity => {
                        self.counters
                            .orders_rejected_no_capacity
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    AppError::InvalidRequest { .. } => {
                        self.counters
                            .orders_rejected_invalid
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    AppError::AdmissionFailed(_) => {
                        self.counters
                            .orders_admission_failed
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                return Err(Status::from(e));
            }
        };

        Ok(Response::new(CreateOrderResponse {
            id: resp.id.to_string(),
            display_id: resp.display_id,
            slot_start_iso8601: resp.slot_start.to_rfc3339(),
            visible_at_iso8601: resp.visible_at.to_rfc3339(),
        }))
    }
}

fn to_core_request(
    req: CreateOrderRequest,
) -> Result<crate::intake::CreateOrderRequest, Status> {
    let customer = req
        .customer
        .ok_or_else(|| Status::invalid_argument("customer is required"))?;

    let discount = req.total_price - req.final_price;

    Ok(crate::intake::CreateOrderRequest {
        items: req
            .items
            .into_iter()
            .map(|i| LineItemRequest {
                sku: i.sku,
                quantity: i.quantity,
                extras: i.extras,
            })
            .collect(),
        total_price: req.total_price,
        final_price: req.final_price,
        discount,
        is_pickup: req.is_pickup,
        customer: CustomerRequest {
            phone: customer.phone,
            first_name: customer.first_name,
            last_name: customer.last_name,
            delivery_address: customer.delivery_address,
        },
    })
}
