use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Process-local operational counters.
#[derive(Clone, Default)]
pub struct Counters {
    pub orders_created: Arc<AtomicU64>,
    pub orders_rejected_no_capacity: Arc<AtomicU64>,
    pub orders_rejected_invalid: Arc<AtomicU64>,
    pub orders_admission_failed: Arc<AtomicU64>,

    pub events_materialised: Arc<AtomicU64>,
    pub events_dead_lettered: Arc<AtomicU64>,
    pub events_retried: Arc<AtomicU64>,

    pub orders_promoted: Arc<AtomicU64>,
    pub fanout_clients_dropped: Arc<AtomicU64>,
}
