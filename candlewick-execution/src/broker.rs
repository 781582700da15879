use crate::error::BrokerError;
use crate::event::{Event, EventStream};
use crate::order::{Order, OrderClass, OrderId, OrderKind, OrderStatus, TrailAmount};
use crate::position::Position;
use candlewick_data::{Bar, ClockAdvance, DataSource, SessionTable};
use candlewick_instrument::{Asset, Right, Side, TradingFee};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use rust_decimal::Decimal;

/// Drives a virtual clock over historical [`Bar`] data, tracking [`Order`]s
/// and [`Position`]s through the fill rules of a single-threaded backtest.
///
/// Orders are keyed by [`OrderId`] in an `FnvHashMap` rather than linked by
/// owning references, so sibling OCO/bracket orders can each point at the
/// other (`dependent_order`) without forming a reference cycle.
pub struct BacktestingBroker<D> {
    data_source: D,
    calendar: SessionTable,
    orders: FnvHashMap<OrderId, Order>,
    /// Tracked-insertion order of `orders`' keys. `spec.md` #5 requires
    /// pending orders to be considered, and their fills published, in this
    /// order on every bar — an `FnvHashMap`'s own iteration order is hash
    /// order and can't be relied on for that.
    order_ids: Vec<OrderId>,
    positions: FnvHashMap<(String, Asset), Position>,
    next_id: u64,
    cash: Decimal,
    pub events: EventStream,
    buy_trading_fees: Vec<TradingFee>,
    sell_trading_fees: Vec<TradingFee>,
    minutes_before_closing: f64,
}

impl<D: DataSource> BacktestingBroker<D> {
    pub fn new(
        data_source: D,
        calendar: SessionTable,
        starting_cash: Decimal,
        buy_trading_fees: Vec<TradingFee>,
        sell_trading_fees: Vec<TradingFee>,
    ) -> Self {
        Self {
            data_source,
            calendar,
            orders: FnvHashMap::default(),
            order_ids: Vec::new(),
            positions: FnvHashMap::default(),
            next_id: 1,
            cash: starting_cash,
            events: EventStream::new(),
            buy_trading_fees,
            sell_trading_fees,
            minutes_before_closing: 15.0,
        }
    }

    /// Overrides the default 15-minute "don't cash-settle on expiration day
    /// until this close to the bell" window (`spec.md` #4.3 step 1).
    pub fn with_minutes_before_closing(mut self, minutes_before_closing: f64) -> Self {
        self.minutes_before_closing = minutes_before_closing;
        self
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.data_source.get_datetime()
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn position(&self, strategy: &str, asset: &Asset) -> Option<&Position> {
        self.positions.get(&(strategy.to_string(), asset.clone()))
    }

    /// `false` once the data source's clock has reached its configured end,
    /// mirroring `Broker.should_continue`.
    pub fn should_continue(&self) -> bool {
        self.datetime() < self.data_source.datetime_end()
    }

    pub fn is_market_open(&self) -> bool {
        self.calendar.is_open(self.datetime())
    }

    /// Seconds until the next session opens, or `0.0` if the market is
    /// already open. Logs and returns `0.0` if no future session is known
    /// (`spec.md` #7's "cannot predict future" soft-error contract).
    pub fn get_time_to_open(&self) -> f64 {
        let now = self.datetime();
        let Some((open, _)) = self.calendar.next_session_after(now - TimeDelta::seconds(1)) else {
            tracing::warn!("cannot predict future: no session open time at or after current clock");
            return 0.0;
        };
        if now >= *open {
            return 0.0;
        }
        (*open - now).as_seconds_f64()
    }

    /// Seconds until the current or next session closes, or `None` if the
    /// market is not open and no session remains to await.
    pub fn get_time_to_close(&self) -> Option<f64> {
        let now = self.datetime();
        let (open, close) = self.calendar.session_closing_at_or_after(now)?;
        if now < *open {
            return None;
        }
        Some((*close - now).as_seconds_f64())
    }

    pub fn update_datetime(&mut self, advance: ClockAdvance) -> Result<(), BrokerError> {
        self.data_source.update_datetime(advance)?;
        Ok(())
    }

    /// The close of `asset`'s current bar, or `None` if no bar covers "now".
    pub fn get_last_price(&self, asset: &Asset) -> Option<Decimal> {
        self.data_source.current_bar(asset).map(|bar| bar.close)
    }

    /// Forwards to [`DataSource::get_historical_prices`], the lookback a
    /// `Strategy` uses to compute indicators without look-ahead bias.
    pub fn get_historical_prices(
        &self,
        asset: &Asset,
        length: usize,
        timeshift: TimeDelta,
    ) -> candlewick_data::Bars {
        self.data_source.get_historical_prices(asset, length, timeshift)
    }

    /// Processes pending orders, then advances the clock to market open
    /// (less `lead_minutes`, if given), matching `_await_market_to_open`'s
    /// "drain pending orders before waiting" ordering.
    pub fn await_market_to_open(&mut self, lead_minutes: Option<f64>) -> Result<(), BrokerError> {
        self.process_pending_orders()?;
        let mut seconds = self.get_time_to_open();
        if let Some(lead) = lead_minutes {
            seconds -= 60.0 * lead;
        }
        self.update_datetime(ClockAdvance::BySeconds(seconds))
    }

    pub fn await_market_to_close(&mut self, lead_minutes: Option<f64>) -> Result<(), BrokerError> {
        self.process_pending_orders()?;
        let mut seconds = self.get_time_to_close().unwrap_or(0.0);
        if let Some(lead) = lead_minutes {
            seconds -= 60.0 * lead;
        }
        self.update_datetime(ClockAdvance::BySeconds(seconds))
    }

    fn allocate_id(&mut self) -> OrderId {
        let id = OrderId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Tracks `order` directly with no expansion, dispatching `NewOrder`.
    /// The primitive the broker uses internally to submit the children of
    /// an expansion (OCO/bracket/OTO siblings, a protective stop).
    ///
    /// Transitions the order to `New` on acceptance (`spec.md` #3's NEW
    /// handler) and appends its id to the insertion-ordered `order_ids`, so
    /// `process_pending_orders` can evaluate and publish fills in tracked
    /// order rather than `FnvHashMap`'s hash order.
    fn submit_order_primitive(&mut self, mut order: Order) -> OrderId {
        let id = order.id;
        order.status = OrderStatus::New;
        tracing::info!(order_id = %id, strategy = %order.strategy, asset = %order.asset.symbol, "order tracked by broker");
        self.orders.insert(id, order);
        self.order_ids.push(id);
        self.events.dispatch(Event::NewOrder { order_id: id });
        id
    }

    /// Accepts a new order request. An `Oco` class is expanded into its two
    /// sibling primitives immediately (matching the teacher's submission-time
    /// `_flatten_order` seam); every other class is tracked as submitted and
    /// expands later, at fill time, in [`Self::process_pending_orders`].
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &mut self,
        strategy: impl Into<String>,
        asset: Asset,
        side: Side,
        quantity: u64,
        kind: OrderKind,
        class: OrderClass,
    ) -> Vec<OrderId> {
        let strategy = strategy.into();

        if let OrderClass::Oco {
            stop_loss_price,
            take_profit_price,
        } = class
        {
            let stop_id = self.allocate_id();
            let stop_order = Order::new(
                stop_id,
                strategy.clone(),
                asset.clone(),
                side,
                quantity,
                OrderKind::Stop { stop_price: stop_loss_price },
                OrderClass::Simple,
            );
            let limit_id = self.allocate_id();
            let limit_order = Order::new(
                limit_id,
                strategy,
                asset,
                side,
                quantity,
                OrderKind::Limit { limit_price: take_profit_price },
                OrderClass::Simple,
            );

            let mut stop_order = stop_order;
            let mut limit_order = limit_order;
            stop_order.dependent_order = Some(limit_id);
            limit_order.dependent_order = Some(stop_id);

            self.submit_order_primitive(stop_order);
            self.submit_order_primitive(limit_order);
            return vec![stop_id, limit_id];
        }

        let id = self.allocate_id();
        let order = Order::new(id, strategy, asset, side, quantity, kind, class);
        vec![self.submit_order_primitive(order)]
    }

    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), BrokerError> {
        let order = self.orders.get_mut(&id).ok_or(BrokerError::UnknownOrder(id))?;
        order.status = OrderStatus::Canceled;
        tracing::info!(order_id = %id, "order canceled");
        self.events.dispatch(Event::CanceledOrder { order_id: id });
        Ok(())
    }

    /// The bracket/OTO sibling orders spawned once `parent` fills: an
    /// opposite-side stop-loss and/or take-profit, cross-linked for
    /// `Bracket` so that either filling cancels the other.
    fn flatten_children(&mut self, parent: &Order) -> Vec<Order> {
        let opposite = parent.side.opposite();
        let (stop_loss_price, stop_loss_limit_price, take_profit_price, cross_link) = match &parent.class {
            OrderClass::Bracket {
                stop_loss_price,
                stop_loss_limit_price,
                take_profit_price,
            } => (Some(*stop_loss_price), *stop_loss_limit_price, Some(*take_profit_price), true),
            OrderClass::Oto {
                stop_loss_price,
                stop_loss_limit_price,
                take_profit_price,
            } => (*stop_loss_price, *stop_loss_limit_price, *take_profit_price, false),
            _ => return Vec::new(),
        };

        let mut stop_order = stop_loss_price.map(|stop_price| {
            let kind = match stop_loss_limit_price {
                Some(limit_price) => OrderKind::StopLimit { stop_price, limit_price },
                None => OrderKind::Stop { stop_price },
            };
            let id = self.allocate_id();
            Order::new(id, parent.strategy.clone(), parent.asset.clone(), opposite, parent.quantity, kind, OrderClass::Simple)
        });

        let mut limit_order = take_profit_price.map(|limit_price| {
            let id = self.allocate_id();
            Order::new(
                id,
                parent.strategy.clone(),
                parent.asset.clone(),
                opposite,
                parent.quantity,
                OrderKind::Limit { limit_price },
                OrderClass::Simple,
            )
        });

        if cross_link {
            if let (Some(stop), Some(limit)) = (&mut stop_order, &mut limit_order) {
                stop.dependent_order = Some(limit.id);
                limit.dependent_order = Some(stop.id);
            }
        }

        [stop_order, limit_order].into_iter().flatten().collect()
    }

    /// Cash-settles every option position past expiration, and every option
    /// position expiring today once within `minutes_before_closing` of the
    /// close (`spec.md` #4.3 step 1). Run before order evaluation so a
    /// position can't be touched by both expiration and a fill in the same
    /// bar.
    fn expire_options(&mut self) -> Result<(), BrokerError> {
        let today = self.datetime().date_naive();
        let expiring: Vec<(String, Asset)> = self
            .positions
            .values()
            .filter(|p| !p.is_flat() && p.asset.is_option() && p.asset.expiration.is_some_and(|exp| exp <= today))
            .map(|p| (p.strategy.clone(), p.asset.clone()))
            .collect();

        for (strategy, asset) in expiring {
            if asset.expiration == Some(today) {
                let Some(time_to_close) = self.get_time_to_close() else {
                    // Market isn't open on expiration day yet; wait for it.
                    continue;
                };
                if time_to_close > self.minutes_before_closing * 60.0 {
                    continue;
                }
            }

            let Some(underlying_price) = self.get_last_price(&asset.underlying()) else {
                tracing::warn!(%asset.symbol, "no underlying price available to expire option");
                continue;
            };
            self.cash_settle_option(&strategy, &asset, underlying_price)?;
        }

        Ok(())
    }

    /// Evaluates every `Unprocessed`/`New` order against its asset's current
    /// bar, filling, expanding, or leaving pending as the five fill rules
    /// dictate. Run at the start of every new bar (`spec.md` #4.3).
    pub fn process_pending_orders(&mut self) -> Result<(), BrokerError> {
        self.expire_options()?;

        let now = self.datetime();
        // Walk `order_ids` (tracked-insertion order), not `self.orders`
        // (hash order) - `spec.md` #5 requires pending orders on a bar to be
        // considered, and their fills published, in insertion order.
        let pending_ids: Vec<OrderId> = self
            .order_ids
            .iter()
            .filter(|id| self.orders.get(id).is_some_and(|o| o.is_pending()))
            .copied()
            .collect();

        for id in pending_ids {
            let Some(order) = self.orders.get(&id) else { continue };
            if order.dependent_order_filled || order.status == OrderStatus::Canceled {
                continue;
            }

            let asset = order.asset.clone();
            let side = order.side;
            let kind = order.kind;
            let quantity = order.quantity;
            let price_triggered = order.price_triggered;
            let trail_stop_price = order.trail_stop_price;

            let Some(bar) = self.data_source.current_bar(&asset) else {
                self.cancel_order(id)?;
                continue;
            };

            let outcome = evaluate_fill(kind, side, &bar, price_triggered, trail_stop_price);

            if let Some(order) = self.orders.get_mut(&id) {
                if let Some(triggered) = outcome.price_triggered {
                    order.price_triggered = triggered;
                }
                if let Some(trail) = outcome.trail_stop_price {
                    order.trail_stop_price = Some(trail);
                }
            }

            let Some(price) = outcome.price else { continue };

            let order = self.orders.get(&id).expect("order present").clone();

            if let Some(dep_id) = order.dependent_order {
                if let Some(dependent) = self.orders.get_mut(&dep_id) {
                    dependent.dependent_order_filled = true;
                }
                let _ = self.cancel_order(dep_id);
            }

            if order.is_bracket_or_oto_parent() {
                let children = self.flatten_children(&order);
                for child in children {
                    self.submit_order_primitive(child);
                }
            }

            let trade_cost = self.calculate_trade_cost(side, order.kind, price, quantity);
            let notional = Decimal::from(side.sign()) * price * Decimal::from(quantity);
            self.cash -= notional + trade_cost;

            if let Some(order_mut) = self.orders.get_mut(&id) {
                order_mut.trade_cost = Some(trade_cost);
                order_mut.status = OrderStatus::Filled;
            }

            let signed_quantity = side.sign() * quantity as i64;
            self.positions
                .entry((order.strategy.clone(), asset.clone()))
                .or_insert_with(|| Position::new(order.strategy.clone(), asset.clone()))
                .apply_fill(id, signed_quantity);

            tracing::info!(order_id = %id, %price, %now, "order filled");
            self.events.dispatch(Event::FilledOrder {
                order_id: id,
                price,
                filled_quantity: quantity,
            });

            if let Some(protective_stop_price) = order.protective_stop_price {
                if matches!(order.class, OrderClass::Simple) {
                    let stop_id = self.allocate_id();
                    let stop_order = Order::new(
                        stop_id,
                        order.strategy.clone(),
                        asset,
                        side,
                        quantity,
                        OrderKind::Stop { stop_price: protective_stop_price },
                        OrderClass::Simple,
                    );
                    self.submit_order_primitive(stop_order);
                }
            }
        }

        Ok(())
    }

    /// Broker/maker fees owed on a fill, per `spec.md` #4.5 — excludes the
    /// trade's notional value, which `process_pending_orders` debits or
    /// credits separately.
    fn calculate_trade_cost(&self, side: Side, kind: OrderKind, price: Decimal, quantity: u64) -> Decimal {
        let fees = match side {
            Side::Buy => &self.buy_trading_fees,
            Side::Sell => &self.sell_trading_fees,
        };

        let mut trade_cost = Decimal::ZERO;
        for fee in fees {
            let applies = (fee.taker && kind.is_taker()) || (fee.maker && kind.is_maker());
            if applies {
                trade_cost += fee.flat_fee;
                trade_cost += price * Decimal::from(quantity) * fee.percent_fee;
            }
        }
        trade_cost
    }

    /// Cash-settles an option position: computes clipped per-contract P/L
    /// against `underlying_price`, credits cash, flattens the position, and
    /// publishes a synthetic offsetting `CashSettled` event
    /// (`spec.md` #4.4).
    pub fn cash_settle_option(
        &mut self,
        strategy: &str,
        asset: &Asset,
        underlying_price: Decimal,
    ) -> Result<(), BrokerError> {
        if !asset.is_option() {
            return Err(BrokerError::NotAnOption(asset.clone()));
        }

        let key = (strategy.to_string(), asset.clone());
        let quantity = self
            .positions
            .get(&key)
            .map(|p| p.quantity)
            .ok_or_else(|| BrokerError::NoPosition {
                strategy: strategy.to_string(),
                asset: asset.clone(),
            })?;

        let strike = asset.strike.expect("option asset carries a strike");
        let right = asset.right.expect("option asset carries a right");
        let multiplier = Decimal::from(asset.multiplier);

        let profit_loss_per_contract = match right {
            Right::Call => underlying_price - strike,
            Right::Put => strike - underlying_price,
        };

        let mut profit_loss = profit_loss_per_contract * Decimal::from(quantity) * multiplier;
        let unfavorable = (quantity > 0 && profit_loss < Decimal::ZERO) || (quantity < 0 && profit_loss > Decimal::ZERO);
        if unfavorable {
            // A long can't lose more than the premium paid; a short can't
            // gain more than the strike. Both clip at zero rather than
            // crediting/debiting further.
            profit_loss = Decimal::ZERO;
        }

        self.cash += profit_loss;

        let side = if quantity > 0 { Side::Sell } else { Side::Buy };
        let filled_quantity = quantity.unsigned_abs();
        let settlement_id = self.allocate_id();
        let mut settlement_order = Order::new(
            settlement_id,
            strategy,
            asset.clone(),
            side,
            filled_quantity,
            OrderKind::Market,
            OrderClass::Simple,
        );
        settlement_order.status = OrderStatus::Filled;
        self.orders.insert(settlement_id, settlement_order);

        if let Some(position) = self.positions.get_mut(&key) {
            position.apply_fill(settlement_id, -quantity);
        }

        let price = if quantity != 0 {
            (profit_loss / Decimal::from(quantity) / multiplier).abs()
        } else {
            Decimal::ZERO
        };

        tracing::info!(%asset.symbol, %profit_loss, "option contract cash settled");
        self.events.dispatch(Event::CashSettled {
            order_id: settlement_id,
            price,
            filled_quantity,
        });

        Ok(())
    }
}

/// Result of evaluating one order's fill rule against one bar: the fill
/// price if triggered, plus any `Order` state the evaluation latched or
/// advanced (carried separately from `OrderKind`, which is immutable data).
#[derive(Debug, Default)]
struct FillOutcome {
    price: Option<Decimal>,
    price_triggered: Option<bool>,
    trail_stop_price: Option<Decimal>,
}

/// Fill-rule dispatch over a single [`OrderKind`] against one [`Bar`],
/// matching `limit_order`/`stop_order`/the `stop_limit` and
/// `trailing_stop` branches of `process_pending_orders` exactly.
fn evaluate_fill(
    kind: OrderKind,
    side: Side,
    bar: &Bar,
    price_triggered: bool,
    trail_stop_price: Option<Decimal>,
) -> FillOutcome {
    match kind {
        OrderKind::Market => FillOutcome {
            price: Some(bar.open),
            ..Default::default()
        },
        OrderKind::Limit { limit_price } => FillOutcome {
            price: fill_price_limit(limit_price, side, bar),
            ..Default::default()
        },
        OrderKind::Stop { stop_price } => FillOutcome {
            price: fill_price_stop(stop_price, side, bar),
            ..Default::default()
        },
        OrderKind::StopLimit { stop_price, limit_price } => {
            if !price_triggered {
                match fill_price_stop(stop_price, side, bar) {
                    // The stop leg triggers and immediately re-evaluates the
                    // limit leg against the same bar, using the stop fill
                    // as the reference "open" — matching the teacher's
                    // `self.limit_order(order.limit_price, order.side, price, high, low)`.
                    Some(triggered_at) => FillOutcome {
                        price: fill_price_limit(
                            limit_price,
                            side,
                            &Bar { open: triggered_at, ..*bar },
                        ),
                        price_triggered: Some(true),
                        trail_stop_price: None,
                    },
                    None => FillOutcome::default(),
                }
            } else {
                FillOutcome {
                    price: fill_price_limit(limit_price, side, bar),
                    ..Default::default()
                }
            }
        }
        OrderKind::TrailingStop { trail } => {
            let price = trail_stop_price.and_then(|trail_price| fill_price_stop(trail_price, side, bar));
            let updated_trail = update_trail_stop_price(side, trail_stop_price, trail, bar);
            FillOutcome {
                price,
                price_triggered: None,
                trail_stop_price: Some(updated_trail),
            }
        }
    }
}

/// Ratchets a trailing stop's reference price toward the market but never
/// away from it: a long's protective stop only rises with new highs, a
/// short's only falls with new lows.
fn update_trail_stop_price(side: Side, existing: Option<Decimal>, trail: TrailAmount, bar: &Bar) -> Decimal {
    match side {
        Side::Sell => {
            let candidate = match trail {
                TrailAmount::Absolute(amount) => bar.high - amount,
                TrailAmount::Percent(pct) => bar.high * (Decimal::ONE - pct),
            };
            existing.map_or(candidate, |current| current.max(candidate))
        }
        Side::Buy => {
            let candidate = match trail {
                TrailAmount::Absolute(amount) => bar.low + amount,
                TrailAmount::Percent(pct) => bar.low * (Decimal::ONE + pct),
            };
            existing.map_or(candidate, |current| current.min(candidate))
        }
    }
}

fn fill_price_limit(limit_price: Decimal, side: Side, bar: &Bar) -> Option<Decimal> {
    match side {
        // Gap down: limit wasn't triggered by the previous bar but this bar
        // opens below the limit, so fill at the open.
        Side::Buy if limit_price >= bar.open => Some(bar.open),
        // Gap up, mirrored for sells.
        Side::Sell if limit_price <= bar.open => Some(bar.open),
        _ if bar.low <= limit_price && limit_price <= bar.high => Some(limit_price),
        _ => None,
    }
}

fn fill_price_stop(stop_price: Decimal, side: Side, bar: &Bar) -> Option<Decimal> {
    match side {
        Side::Sell if stop_price >= bar.open => Some(bar.open),
        Side::Buy if stop_price <= bar.open => Some(bar.open),
        _ if bar.low <= stop_price && stop_price <= bar.high => Some(stop_price),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlewick_data::{Bars, HistoricalDataSource, Timestep};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        bar_at(0, open, high, low, close)
    }

    fn bar_at(minute_offset: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            datetime: DateTime::parse_from_rfc3339("2024-01-02T14:30:00Z").unwrap().with_timezone(&Utc)
                + TimeDelta::minutes(minute_offset),
            open,
            high,
            low,
            close,
            volume: dec!(1000),
        }
    }

    #[test]
    fn limit_buy_fills_at_open_on_gap_down() {
        let bar = bar(dec!(95), dec!(97), dec!(94), dec!(96));
        let price = fill_price_limit(dec!(100), Side::Buy, &bar);
        assert_eq!(price, Some(dec!(95)));
    }

    #[test]
    fn limit_buy_fills_at_limit_when_in_range() {
        let bar = bar(dec!(105), dec!(106), dec!(99), dec!(101));
        let price = fill_price_limit(dec!(100), Side::Buy, &bar);
        assert_eq!(price, Some(dec!(100)));
    }

    #[test]
    fn limit_buy_does_not_fill_when_out_of_range() {
        let bar = bar(dec!(105), dec!(106), dec!(104), dec!(105));
        let price = fill_price_limit(dec!(100), Side::Buy, &bar);
        assert_eq!(price, None);
    }

    #[test]
    fn stop_sell_fills_within_range() {
        let bar = bar(dec!(101), dec!(102), dec!(98), dec!(99));
        let price = fill_price_stop(dec!(100), Side::Sell, &bar);
        assert_eq!(price, Some(dec!(100)));
    }

    #[test]
    fn market_buy_fills_trivially_at_open() {
        let mut table = HashMap::new();
        let asset = Asset::stock("AAPL");
        table.insert(asset.clone(), Bars::new(vec![bar(dec!(100), dec!(101), dec!(99), dec!(100))]));
        let source = HistoricalDataSource::new(
            DateTime::parse_from_rfc3339("2024-01-02T14:30:00Z").unwrap().with_timezone(&Utc),
            DateTime::parse_from_rfc3339("2024-01-02T21:00:00Z").unwrap().with_timezone(&Utc),
            Timestep::Minute,
            table,
        );
        let calendar = candlewick_data::Calendar::sessions(
            candlewick_data::Market::AlwaysOpen,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
        .unwrap();
        let buy_fees = vec![TradingFee::taker_fee(dec!(1), dec!(0))];
        let mut broker = BacktestingBroker::new(source, calendar, dec!(10000), buy_fees, vec![]);
        broker.submit_order("demo", asset.clone(), Side::Buy, 10, OrderKind::Market, OrderClass::Simple);
        broker.process_pending_orders().unwrap();
        let position = broker.position("demo", &asset).unwrap();
        assert_eq!(position.quantity, 10);
        // 10 shares * 100 notional + a flat $1 fee.
        assert_eq!(broker.cash(), dec!(8999));
    }

    fn broker_with_bars(asset: Asset, bars: Vec<Bar>) -> BacktestingBroker<HistoricalDataSource> {
        let start = bars.first().map(|b| b.datetime).unwrap();
        let end = bars.last().map(|b| b.datetime).unwrap() + TimeDelta::hours(1);
        let mut table = HashMap::new();
        table.insert(asset, Bars::new(bars));
        let source = HistoricalDataSource::new(start, end, Timestep::Minute, table);
        let calendar = candlewick_data::Calendar::sessions(
            candlewick_data::Market::AlwaysOpen,
            start.date_naive(),
            end.date_naive(),
        )
        .unwrap();
        BacktestingBroker::new(source, calendar, dec!(100000), vec![], vec![])
    }

    #[test]
    fn expired_option_position_is_cash_settled_automatically() {
        let stock = Asset::stock("AAPL");
        let expiration = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let option = Asset::option("AAPL", expiration, dec!(90), Right::Call);

        let t0 = DateTime::parse_from_rfc3339("2024-01-02T14:30:00Z").unwrap().with_timezone(&Utc);
        let mut table = HashMap::new();
        table.insert(stock.clone(), Bars::new(vec![bar_at(0, dec!(100), dec!(101), dec!(99), dec!(100))]));
        table.insert(option.clone(), Bars::new(vec![bar_at(0, dec!(5), dec!(5), dec!(5), dec!(5))]));
        let source = HistoricalDataSource::new(t0, t0 + TimeDelta::hours(1), Timestep::Minute, table);
        let calendar = candlewick_data::Calendar::sessions(
            candlewick_data::Market::AlwaysOpen,
            t0.date_naive(),
            t0.date_naive(),
        )
        .unwrap();
        let mut broker = BacktestingBroker::new(source, calendar, dec!(100000), vec![], vec![]);

        broker.submit_order("demo", option.clone(), Side::Buy, 1, OrderKind::Market, OrderClass::Simple);
        broker.process_pending_orders().unwrap();
        assert_eq!(broker.position("demo", &option).unwrap().quantity, 1);

        // Expiration is already in the past relative to `t0`, so the next
        // sweep settles it without waiting on time-to-close.
        broker.process_pending_orders().unwrap();

        assert!(broker.position("demo", &option).unwrap().is_flat());
        // 1 contract bought at 5, then settled for 1000 intrinsic value.
        assert_eq!(broker.cash(), dec!(100995));
    }

    #[test]
    fn oco_stop_leg_filling_cancels_the_limit_sibling() {
        let asset = Asset::stock("AAPL");
        let bars = vec![bar(dec!(100), dec!(101), dec!(90), dec!(95))];
        let mut broker = broker_with_bars(asset.clone(), bars);

        let ids = broker.submit_order(
            "demo",
            asset,
            Side::Sell,
            10,
            OrderKind::Market,
            OrderClass::Oco {
                stop_loss_price: dec!(95),
                take_profit_price: dec!(110),
            },
        );
        let (stop_id, limit_id) = (ids[0], ids[1]);

        broker.process_pending_orders().unwrap();

        assert_eq!(broker.order(stop_id).unwrap().status, OrderStatus::Filled);
        assert_eq!(broker.order(limit_id).unwrap().status, OrderStatus::Canceled);
    }

    #[test]
    fn bracket_parent_fill_spawns_stop_and_limit_children() {
        let asset = Asset::stock("AAPL");
        let bars = vec![bar(dec!(100), dec!(101), dec!(99), dec!(100))];
        let mut broker = broker_with_bars(asset.clone(), bars);

        let ids = broker.submit_order(
            "demo",
            asset,
            Side::Buy,
            10,
            OrderKind::Market,
            OrderClass::Bracket {
                stop_loss_price: dec!(90),
                stop_loss_limit_price: None,
                take_profit_price: dec!(120),
            },
        );
        let parent_id = ids[0];

        broker.process_pending_orders().unwrap();

        assert_eq!(broker.order(parent_id).unwrap().status, OrderStatus::Filled);
        let children: Vec<_> = broker
            .orders
            .values()
            .filter(|o| o.id != parent_id)
            .collect();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.side == Side::Sell && c.is_pending()));
    }

    #[test]
    fn trailing_stop_sell_ratchets_up_and_never_loosens() {
        let asset = Asset::stock("AAPL");
        let bars = vec![
            bar_at(0, dec!(100), dec!(105), dec!(99), dec!(104)),
            bar_at(1, dec!(104), dec!(106), dec!(103), dec!(105)),
            bar_at(2, dec!(105), dec!(105), dec!(95), dec!(96)),
        ];
        let mut broker = broker_with_bars(asset.clone(), bars);

        let ids = broker.submit_order(
            "demo",
            asset,
            Side::Sell,
            10,
            OrderKind::TrailingStop {
                trail: TrailAmount::Absolute(dec!(5)),
            },
            OrderClass::Simple,
        );
        let id = ids[0];

        broker.process_pending_orders().unwrap();
        // First tick only primes the trail from bar 0 (high 105 -> trail
        // 100); no fill yet, since there is no prior trail to check against.
        assert!(broker.order(id).unwrap().status != OrderStatus::Filled);
        assert_eq!(broker.order(id).unwrap().trail_stop_price, Some(dec!(100)));

        broker.update_datetime(ClockAdvance::By(TimeDelta::minutes(1))).unwrap();
        broker.process_pending_orders().unwrap();
        // Bar 1's high (106) ratchets the trail up to 101; bar 1's own
        // range doesn't cross the prior (100) trail, so no fill yet.
        assert_eq!(broker.order(id).unwrap().trail_stop_price, Some(dec!(101)));
        assert!(broker.order(id).unwrap().status != OrderStatus::Filled);

        broker.update_datetime(ClockAdvance::By(TimeDelta::minutes(1))).unwrap();
        broker.process_pending_orders().unwrap();
        // Third bar's range [95, 105] crosses the 101 trail stop: filled.
        assert_eq!(broker.order(id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn stop_limit_latches_after_the_stop_leg_triggers() {
        let asset = Asset::stock("AAPL");
        let bars = vec![
            // Stop (100) not reached this bar; order stays untriggered.
            bar_at(0, dec!(98), dec!(99), dec!(97), dec!(98)),
            // Open gaps above the stop, triggering it; limit (102) then
            // evaluated against the same bar using the stop fill as open.
            bar_at(1, dec!(103), dec!(104), dec!(101), dec!(102)),
        ];
        let mut broker = broker_with_bars(asset.clone(), bars);

        let ids = broker.submit_order(
            "demo",
            asset,
            Side::Buy,
            10,
            OrderKind::StopLimit {
                stop_price: dec!(100),
                limit_price: dec!(102),
            },
            OrderClass::Simple,
        );
        let id = ids[0];

        broker.process_pending_orders().unwrap();
        assert!(!broker.order(id).unwrap().price_triggered);
        assert!(broker.order(id).unwrap().status != OrderStatus::Filled);

        broker.update_datetime(ClockAdvance::By(TimeDelta::minutes(1))).unwrap();
        broker.process_pending_orders().unwrap();
        assert!(broker.order(id).unwrap().price_triggered);
        assert_eq!(broker.order(id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn cash_settling_a_long_call_credits_intrinsic_value() {
        let underlying = Asset::stock("AAPL");
        let expiration = chrono::NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();
        let option = Asset::option(underlying.symbol.clone(), expiration, dec!(100), Right::Call);
        let bars = vec![bar(dec!(100), dec!(101), dec!(99), dec!(100))];
        let mut broker = broker_with_bars(option.clone(), bars);

        broker.submit_order("demo", option.clone(), Side::Buy, 2, OrderKind::Market, OrderClass::Simple);
        broker.process_pending_orders().unwrap();
        let cash_before = broker.cash();

        broker.cash_settle_option("demo", &option, dec!(110)).unwrap();

        // 2 contracts * (110 - 100) strike spread * 100 multiplier.
        assert_eq!(broker.cash(), cash_before + dec!(2000));
        assert!(broker.position("demo", &option).unwrap().is_flat());
    }
}
