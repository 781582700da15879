use candlewick_instrument::{Asset, Side};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Broker-assigned identity of a tracked [`Order`].
///
/// [`Order::dependent_order`] stores a sibling `OrderId` rather than an
/// owning reference, so that mutually-linked OCO/bracket siblings never
/// form a reference cycle — the broker resolves the id through its
/// tracked-order map (`spec.md` #9).
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, Constructor,
)]
pub struct OrderId(pub u64);

/// Trailing-stop offset, either an absolute price distance or a percentage
/// of the favorable extreme the trail is measured from.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrailAmount {
    Absolute(Decimal),
    Percent(Decimal),
}

/// The five order types `spec.md` #3 names, tagged with the price state
/// each one needs to evaluate a fill. The fill evaluator
/// ([`crate::broker::fill_price`]) is a single dispatch over this tag.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit { limit_price: Decimal },
    Stop { stop_price: Decimal },
    StopLimit { stop_price: Decimal, limit_price: Decimal },
    TrailingStop { trail: TrailAmount },
}

impl OrderKind {
    pub fn is_taker(&self) -> bool {
        matches!(self, OrderKind::Market | OrderKind::Stop { .. })
    }

    pub fn is_maker(&self) -> bool {
        matches!(self, OrderKind::Limit { .. } | OrderKind::StopLimit { .. })
    }
}

/// Structural class of an order request, determining how
/// [`crate::broker::flatten_order`] expands it into primitive children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderClass {
    /// A standalone order. May optionally carry a `protective_stop_price`
    /// (see [`Order::protective_stop_price`]), used for trailing
    /// protection of the primary fill.
    Simple,
    /// One-cancels-other: a stop-loss and a take-profit on the same side;
    /// whichever fills first cancels the other.
    Oco {
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
    },
    /// A primary entry plus an opposite-side stop-loss and take-profit,
    /// created on acceptance but tracked only once the primary fills.
    Bracket {
        stop_loss_price: Decimal,
        stop_loss_limit_price: Option<Decimal>,
        take_profit_price: Decimal,
    },
    /// One-triggers-other: a primary plus one or both of a stop-loss /
    /// take-profit child, tracked once the primary fills.
    Oto {
        stop_loss_price: Option<Decimal>,
        stop_loss_limit_price: Option<Decimal>,
        take_profit_price: Option<Decimal>,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum OrderStatus {
    Unprocessed,
    New,
    Filled,
    Canceled,
}

/// A request to transact `quantity` of `asset` on `side`, plus the runtime
/// state the broker mutates as it moves through its lifecycle.
///
/// Once `status` is `Filled` or `Canceled`, no further transition occurs
/// (`spec.md` #3 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub strategy: String,
    pub asset: Asset,
    /// Quote asset for crypto pairs; unused otherwise.
    pub quote: Option<Asset>,
    pub side: Side,
    pub quantity: u64,
    pub kind: OrderKind,
    pub class: OrderClass,
    /// A protective stop carried by an otherwise-simple order (lumibot's
    /// `order.stop_price` on a non-`stop`-typed order): on fill, expands
    /// into a same-side sibling stop order.
    pub protective_stop_price: Option<Decimal>,
    pub status: OrderStatus,
    /// Latched once a `stop_limit` order's stop leg has triggered.
    pub price_triggered: bool,
    /// Running trail reference price for `trailing_stop` orders.
    pub trail_stop_price: Option<Decimal>,
    pub trade_cost: Option<Decimal>,
    pub dependent_order: Option<OrderId>,
    pub dependent_order_filled: bool,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: OrderId,
        strategy: impl Into<String>,
        asset: Asset,
        side: Side,
        quantity: u64,
        kind: OrderKind,
        class: OrderClass,
    ) -> Self {
        Self {
            id,
            strategy: strategy.into(),
            asset,
            quote: None,
            side,
            quantity,
            kind,
            class,
            protective_stop_price: None,
            status: OrderStatus::Unprocessed,
            price_triggered: false,
            trail_stop_price: None,
            trade_cost: None,
            dependent_order: None,
            dependent_order_filled: false,
        }
    }

    pub fn with_quote(mut self, quote: Asset) -> Self {
        self.quote = Some(quote);
        self
    }

    pub fn with_protective_stop(mut self, stop_price: Decimal) -> Self {
        self.protective_stop_price = Some(stop_price);
        self
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, OrderStatus::Unprocessed | OrderStatus::New)
    }

    pub fn is_bracket_or_oto_parent(&self) -> bool {
        matches!(self.class, OrderClass::Bracket { .. } | OrderClass::Oto { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_starts_unprocessed_and_untriggered() {
        let order = Order::new(
            OrderId(1),
            "demo",
            Asset::stock("AAPL"),
            Side::Buy,
            10,
            OrderKind::Market,
            OrderClass::Simple,
        );
        assert_eq!(order.status, OrderStatus::Unprocessed);
        assert!(!order.price_triggered);
        assert!(order.is_pending());
    }
}
