/// Boundary interface onto the menu/recipe subsystem.
pub trait MenuSnapshot: Send + Sync {
    /// Price of a sku (pizza or extra) in minor units, or `None` if the sku
    /// does not exist in the current snapshot.
    fn price_of(&self, sku: &str) -> Option<i64>;
}

/// Fixed in-memory snapshot, used by tests and as a placeholder wiring
/// until the real menu service publishes updates on `menu:update`.
pub struct StaticMenu {
    prices: std::collections::HashMap<String, i64>,
}

impl StaticMenu {
    pub fn new(prices: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            prices: prices.into_iter().collect(),
        }
    }
}

impl MenuSnapshot for StaticMenu {
    fn price_of(&self, sku: &str) -> Option<i64> {
        self.prices.get(sku).copied()
    }
}
