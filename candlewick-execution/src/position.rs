use crate::order::OrderId;
use candlewick_instrument::Asset;
use serde::{Deserialize, Serialize};

/// Per-`(strategy, asset)` aggregate quantity plus the orders that built
/// it. Quantity is the signed sum of filled order quantities — positive
/// for net-long, negative for net-short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub strategy: String,
    pub asset: Asset,
    pub quantity: i64,
    pub orders: Vec<OrderId>,
}

impl Position {
    pub fn new(strategy: impl Into<String>, asset: Asset) -> Self {
        Self {
            strategy: strategy.into(),
            asset,
            quantity: 0,
            orders: Vec::new(),
        }
    }

    /// Fold a fill of `signed_quantity` (positive for buys, negative for
    /// sells) into this position, recording the order that produced it.
    pub fn apply_fill(&mut self, order_id: OrderId, signed_quantity: i64) {
        self.quantity += signed_quantity;
        self.orders.push(order_id);
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}
