use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single line of a strategy's fee schedule, applied per fill in
/// [`calculate_trade_cost`](../candlewick_execution/fn.calculate_trade_cost.html).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingFee {
    pub flat_fee: Decimal,
    pub percent_fee: Decimal,
    /// Applies to liquidity-taking fills: `market` and `stop` orders.
    pub taker: bool,
    /// Applies to liquidity-making fills: `limit` and `stop_limit` orders.
    pub maker: bool,
}

impl TradingFee {
    pub fn taker_fee(flat_fee: Decimal, percent_fee: Decimal) -> Self {
        Self {
            flat_fee,
            percent_fee,
            taker: true,
            maker: false,
        }
    }

    pub fn maker_fee(flat_fee: Decimal, percent_fee: Decimal) -> Self {
        Self {
            flat_fee,
            percent_fee,
            taker: false,
            maker: true,
        }
    }
}
