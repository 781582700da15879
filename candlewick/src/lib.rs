//! The illustrative strategy harness: a thin `Strategy` adapter plus a
//! `BacktestRunner` driving `candlewick-execution`'s broker bar by bar.
//! Re-exports the lower crates so a backtest needs only one dependency.

pub mod runner;
pub mod strategy;

pub use candlewick_data::{Bar, Bars, Calendar, DataSource, HistoricalDataSource, Market, Timestep};
pub use candlewick_execution::{BacktestingBroker, BrokerError, Event, EventKind, Order, OrderClass, OrderId, OrderKind, Position};
pub use candlewick_instrument::{Asset, Right, Side, TradingFee};
pub use runner::BacktestRunner;
pub use strategy::Strategy;
