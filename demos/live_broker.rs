//! Illustrative interface for a live-broker adapter, out of the core
//! budget (`spec.md` #1, `SPEC_FULL.md` #1: "live-broker adapters ... remain
//! external collaborators; only their interfaces are modelled").
//!
//! `original_source/BlueprintBot.py` is the concrete shape this mirrors:
//! it drives a REST broker (Alpaca) through `is_market_open`,
//! `get_time_to_open`/`get_time_to_close`, `get_last_price`, and
//! `submit_order`. A real adapter would implement this trait against that
//! API and be handed to the same `Strategy`-driven trading loop that
//! `BacktestRunner` drives in-process against `BacktestingBroker`.
//!
//! Not wired into the workspace: no network client, no retry policy, no
//! auth — those belong to the adapter crate this stands in for.

use candlewick_instrument::{Asset, Side};
use rust_decimal::Decimal;

pub trait LiveBrokerClient {
    type Error;

    fn is_market_open(&self) -> Result<bool, Self::Error>;
    fn get_time_to_open(&self) -> Result<f64, Self::Error>;
    fn get_time_to_close(&self) -> Result<f64, Self::Error>;
    fn get_last_price(&self, asset: &Asset) -> Result<Decimal, Self::Error>;
    fn submit_order(&mut self, asset: &Asset, side: Side, quantity: u64) -> Result<(), Self::Error>;
}
