pub mod order;
pub mod slot;

pub use order::{Customer, LineItem, Order, OrderStatus};
pub use slot::{BusinessHours, SlotId, SlotSnapshot, floor_15};
