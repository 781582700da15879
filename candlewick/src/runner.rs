use crate::strategy::Strategy;
use candlewick_data::{DataSource, SessionTable};
use candlewick_execution::{BacktestingBroker, BrokerError};
use chrono::TimeDelta;
use rust_decimal::Decimal;

/// Drives a [`Strategy`] over a [`BacktestingBroker`] bar by bar. The
/// minimal harness needed to run the broker end-to-end — not a
/// multi-strategy, live-trading `Trader`.
pub struct BacktestRunner;

impl BacktestRunner {
    /// Builds a broker configured from `strategy`'s fee schedule and
    /// expiration-settlement window, per `spec.md` #6's `Strategy` contract.
    pub fn build_broker<D: DataSource, S: Strategy<D>>(
        strategy: &S,
        data_source: D,
        calendar: SessionTable,
        starting_cash: Decimal,
    ) -> BacktestingBroker<D> {
        BacktestingBroker::new(
            data_source,
            calendar,
            starting_cash,
            strategy.buy_trading_fees(),
            strategy.sell_trading_fees(),
        )
        .with_minutes_before_closing(strategy.minutes_before_closing())
    }

    /// Runs `strategy` until `broker.should_continue()` is false, advancing
    /// the virtual clock by `tick` after each iteration.
    ///
    /// Matches `spec.md` #4.3's "executed at the start of every new bar":
    /// pending orders are processed (and expiring options settled) before
    /// `strategy.on_trading_iteration` sees the bar.
    pub fn run<D: DataSource, S: Strategy<D>>(
        broker: &mut BacktestingBroker<D>,
        strategy: &mut S,
        tick: TimeDelta,
    ) -> Result<(), BrokerError> {
        tracing::info!(strategy = strategy.name(), "backtest started");
        while broker.should_continue() {
            broker.process_pending_orders()?;
            strategy.on_trading_iteration(broker);
            broker.update_datetime(candlewick_data::ClockAdvance::By(tick))?;
        }
        tracing::info!(strategy = strategy.name(), cash = %broker.cash(), "backtest finished");
        Ok(())
    }
}
