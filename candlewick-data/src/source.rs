use crate::bar::{Bar, Bars};
use candlewick_instrument::Asset;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// The bar width served by a [`DataSource`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Timestep {
    Minute,
    Day,
}

impl Timestep {
    pub fn duration(self) -> TimeDelta {
        match self {
            Timestep::Minute => TimeDelta::minutes(1),
            Timestep::Day => TimeDelta::days(1),
        }
    }
}

/// How far to advance the virtual clock, mirroring the three input shapes
/// `_update_datetime` accepts in `spec.md` #4.2: an absolute timestamp, a
/// duration, or a number of seconds.
#[derive(Debug, Copy, Clone)]
pub enum ClockAdvance {
    At(DateTime<Utc>),
    By(TimeDelta),
    BySeconds(f64),
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum DataSourceError {
    #[error("clock must advance monotonically: {new} is before current {current}")]
    NonMonotonicClock {
        current: DateTime<Utc>,
        new: DateTime<Utc>,
    },
}

/// Historical OHLCV data source, owning the virtual clock of the backtest.
pub trait DataSource {
    fn get_datetime(&self) -> DateTime<Utc>;
    fn datetime_start(&self) -> DateTime<Utc>;
    fn datetime_end(&self) -> DateTime<Utc>;

    /// Advance the virtual clock. Must reject any `advance` that would move
    /// the clock backward.
    fn update_datetime(&mut self, advance: ClockAdvance) -> Result<(), DataSourceError>;

    /// The most recent `length` bars strictly ending at or before
    /// `current_datetime + timeshift`. Never returns a bar from beyond that
    /// cutoff — this is the look-ahead-bias boundary the whole broker
    /// depends on.
    fn get_historical_prices(&self, asset: &Asset, length: usize, timeshift: TimeDelta) -> Bars;

    /// The bar "covering now" for order evaluation, implementing the
    /// PANDAS bar-lookup quirk of `spec.md` #9: fetch 2 bars reaching 1
    /// timestep past the current instant, keep only rows with
    /// `datetime >= current_datetime`, and fall back to the single most
    /// recent row if that filter leaves nothing. Because
    /// `get_historical_prices`'s cutoff is inclusive, a `+1 * timestep`
    /// reach is enough for the "now" bar to already be the last row of the
    /// window — never returning a bar strictly after `current_datetime`
    /// (`spec.md` #8's look-ahead-absence invariant).
    fn current_bar(&self, asset: &Asset) -> Option<Bar>;
}

/// In-memory backtesting [`DataSource`]: a table of [`Bars`] per asset plus
/// the virtual clock.
#[derive(Debug, Clone)]
pub struct HistoricalDataSource {
    clock: DateTime<Utc>,
    datetime_start: DateTime<Utc>,
    datetime_end: DateTime<Utc>,
    timestep: Timestep,
    bars: HashMap<Asset, Bars>,
}

impl HistoricalDataSource {
    pub fn new(
        datetime_start: DateTime<Utc>,
        datetime_end: DateTime<Utc>,
        timestep: Timestep,
        bars: HashMap<Asset, Bars>,
    ) -> Self {
        Self {
            clock: datetime_start,
            datetime_start,
            datetime_end,
            timestep,
            bars,
        }
    }

    pub fn timestep(&self) -> Timestep {
        self.timestep
    }

    pub fn insert(&mut self, asset: Asset, bars: Bars) {
        self.bars.insert(asset, bars);
    }
}

impl DataSource for HistoricalDataSource {
    fn get_datetime(&self) -> DateTime<Utc> {
        self.clock
    }

    fn datetime_start(&self) -> DateTime<Utc> {
        self.datetime_start
    }

    fn datetime_end(&self) -> DateTime<Utc> {
        self.datetime_end
    }

    fn update_datetime(&mut self, advance: ClockAdvance) -> Result<(), DataSourceError> {
        let new = match advance {
            ClockAdvance::At(dt) => dt,
            ClockAdvance::By(delta) => self.clock + delta,
            ClockAdvance::BySeconds(seconds) => {
                self.clock + TimeDelta::milliseconds((seconds * 1000.0) as i64)
            }
        };

        if new < self.clock {
            return Err(DataSourceError::NonMonotonicClock {
                current: self.clock,
                new,
            });
        }

        tracing::info!(datetime = %new, "backtesting clock advanced");
        self.clock = new;
        Ok(())
    }

    fn get_historical_prices(&self, asset: &Asset, length: usize, timeshift: TimeDelta) -> Bars {
        let cutoff = self.clock + timeshift;
        self.bars
            .get(asset)
            .map(|bars| bars.as_of(length, cutoff))
            .unwrap_or_default()
    }

    fn current_bar(&self, asset: &Asset) -> Option<Bar> {
        // `get_historical_prices`'s cutoff is inclusive (`datetime <=
        // cutoff`), so the bar covering "now" is already the last row
        // returned by a window reaching exactly one timestep past the
        // clock - no need to reach further, and reaching `+2` would make
        // the `>= now` filter below pick the *next* bar instead whenever
        // one exists.
        let timeshift = self.timestep.duration();
        let window = self.get_historical_prices(asset, 2, timeshift);
        if window.is_empty() {
            return None;
        }

        let in_range: Vec<Bar> = window
            .rows()
            .iter()
            .copied()
            .filter(|bar| bar.datetime >= self.clock)
            .collect();

        if let Some(first) = in_range.first() {
            Some(*first)
        } else {
            // Filter left nothing: fall back to the last available row,
            // the best data we have, per the normative PANDAS quirk.
            window.rows().last().copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(minute_offset: i64) -> Bar {
        Bar {
            datetime: DateTime::parse_from_rfc3339("2024-01-02T09:30:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + TimeDelta::minutes(minute_offset),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(500),
        }
    }

    fn source_with(bars: Vec<Bar>) -> HistoricalDataSource {
        let asset = Asset::stock("AAPL");
        let mut table = HashMap::new();
        table.insert(asset, Bars::new(bars));
        HistoricalDataSource::new(
            DateTime::parse_from_rfc3339("2024-01-02T09:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            DateTime::parse_from_rfc3339("2024-01-02T16:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            Timestep::Minute,
            table,
        )
    }

    #[test]
    fn clock_rejects_backward_motion() {
        let mut source = source_with(vec![bar(0)]);
        let err = source.update_datetime(ClockAdvance::By(TimeDelta::minutes(-1)));
        assert!(err.is_err());
    }

    #[test]
    fn current_bar_filters_to_now_and_later() {
        let mut source = source_with(vec![bar(0), bar(1)]);
        source.update_datetime(ClockAdvance::At(bar(1).datetime)).unwrap();
        let asset = Asset::stock("AAPL");
        let current = source.current_bar(&asset).unwrap();
        assert_eq!(current.datetime, bar(1).datetime);
    }

    #[test]
    fn current_bar_falls_back_to_last_row_when_filter_empty() {
        let mut source = source_with(vec![bar(0), bar(1)]);
        // Clock moves past every bar in the table.
        source
            .update_datetime(ClockAdvance::At(bar(1).datetime + TimeDelta::minutes(10)))
            .unwrap();
        let asset = Asset::stock("AAPL");
        let current = source.current_bar(&asset).unwrap();
        assert_eq!(current.datetime, bar(1).datetime);
    }

    #[test]
    fn current_bar_is_none_without_data() {
        let source = source_with(vec![]);
        let asset = Asset::stock("AAPL");
        assert!(source.current_bar(&asset).is_none());
    }

    #[test]
    fn current_bar_never_reaches_past_the_bar_covering_now() {
        // With 2 bars strictly after "now" in the table, a window that
        // reaches too far forward would cap on those future bars instead
        // of the one covering the clock.
        let mut source = source_with(vec![bar(0), bar(1), bar(2), bar(3)]);
        source.update_datetime(ClockAdvance::At(bar(1).datetime)).unwrap();
        let asset = Asset::stock("AAPL");
        let current = source.current_bar(&asset).unwrap();
        assert_eq!(current.datetime, bar(1).datetime);
    }
}
