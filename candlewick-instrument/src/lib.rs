//! Core data structures shared across the Candlewick backtesting engine:
//! tradable [`Asset`] identity, order [`Side`], and the [`TradingFee`]
//! schedule a strategy attaches to its fills.

mod asset;
mod fee;
mod side;

pub use asset::{Asset, AssetType, Right};
pub use fee::TradingFee;
pub use side::Side;
