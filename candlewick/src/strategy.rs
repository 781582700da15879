use candlewick_data::DataSource;
use candlewick_execution::BacktestingBroker;
use candlewick_instrument::TradingFee;

/// The thin adapter a backtest implements, mirroring the handful of methods
/// `original_source/BlueprintBot.py` drives its trading loop through:
/// `await_market_to_open`/`get_last_price`/`submit_order` on the broker side,
/// and a single per-bar hook on the strategy side.
///
/// `candlewick` does not attempt to reproduce a multi-strategy, live-trading
/// `Trader` — `Strategy` and [`super::BacktestRunner`] exist only to drive
/// the broker end-to-end for tests and the illustrative demo.
pub trait Strategy<D: DataSource> {
    fn name(&self) -> &str;

    /// How close to the closing bell an expiring option is cash-settled;
    /// forwarded into [`BacktestingBroker::with_minutes_before_closing`].
    fn minutes_before_closing(&self) -> f64 {
        15.0
    }

    fn buy_trading_fees(&self) -> Vec<TradingFee> {
        Vec::new()
    }

    fn sell_trading_fees(&self) -> Vec<TradingFee> {
        Vec::new()
    }

    /// Called once per bar, after `process_pending_orders` has already run.
    /// Implementations read market data and positions off `broker` and call
    /// `broker.submit_order` (`create_order` in `spec.md` #6's naming) to
    /// act.
    fn on_trading_iteration(&mut self, broker: &mut BacktestingBroker<D>);
}
