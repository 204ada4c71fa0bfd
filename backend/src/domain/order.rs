use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Finite set of order statuses.
///
/// Only `Pending -> Accepted` is owned by this core (the embargo promoter).
/// All other transitions are driven by external kitchen collaborators
/// and are accepted as already-validated input when materialised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    Cooking,
    Ready,
    Delivered,
    Cancelled,
    Archived,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Cooking => "cooking",
            OrderStatus::Ready => "ready",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => OrderStatus::Pending,
            "accepted" => OrderStatus::Accepted,
            "preparing" => OrderStatus::Preparing,
            "cooking" => OrderStatus::Cooking,
            "ready" => OrderStatus::Ready,
            "delivered" => OrderStatus::Delivered,
            "cancelled" => OrderStatus::Cancelled,
            "archived" => OrderStatus::Archived,
            _ => return None,
        })
    }

    /// This core only ever owns the `Pending -> Accepted` compare-and-set
    /// (the embargo promoter). Any other transition is left to collaborators.
    pub fn can_promoter_transition_to(&self, next: OrderStatus) -> bool {
        matches!((self, next), (OrderStatus::Pending, OrderStatus::Accepted))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub extras: Vec<String>,
    pub pizza_price: i64,
    pub extras_price: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Customer {
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub delivery_address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub display_id: String,
    pub items: Vec<LineItem>,
    pub total_price: i64,
    pub final_price: i64,
    pub is_pickup: bool,
    pub customer: Customer,
    pub created_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
    pub slot_id: String,
    pub slot_start: DateTime<Utc>,
    pub status: OrderStatus,
}

impl Order {
    /// Strips the fields role `kitchen` must never see.
    pub fn strip_for_kitchen(&mut self) {
        self.customer.delivery_address = None;
        self.customer.phone.clear();
        self.is_pickup = false;
        self.final_price = 0;
    }

    /// Strips the fields role `courier` must never see.
    pub fn strip_for_courier(&mut self) {
        self.final_price = 0;
        for item in &mut self.items {
            item.extras.clear();
        }
    }
}
