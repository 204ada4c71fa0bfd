pub mod scheduler;

pub use scheduler::{SlotScheduler, SlotsConfig};
