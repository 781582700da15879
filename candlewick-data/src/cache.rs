//! Illustrative cache-loader surface (`spec.md` #2, #6). Out of the core
//! budget: a real implementation would read vendor-specific on-disk
//! formats (Parquet, CSV, ...); this module only specifies the shape the
//! core consumes through [`DataSource::get_historical_prices`](crate::source::DataSource).

use crate::bar::{Bar, Bars};
use crate::calendar::SessionTable;
use candlewick_instrument::{AssetType, Right};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

/// Key identifying one persisted OHLCV series, matching the column schema
/// `(asset_type, symbol[, expiration, strike, right], timestep)` from
/// `spec.md` #6.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset_type: AssetType,
    pub symbol: String,
    pub expiration: Option<NaiveDate>,
    pub strike: Option<Decimal>,
    pub right: Option<Right>,
}

/// A columnar table of persisted bars, indexed by `datetime`.
#[derive(Debug, Clone, Default)]
pub struct ColumnarBarTable {
    rows: Vec<(DateTime<Utc>, Bar)>,
}

impl ColumnarBarTable {
    pub fn from_rows(rows: Vec<Bar>) -> Self {
        Self {
            rows: rows.into_iter().map(|bar| (bar.datetime, bar)).collect(),
        }
    }

    pub fn into_bars(self) -> Bars {
        Bars::new(self.rows.into_iter().map(|(_, bar)| bar).collect())
    }

    pub fn trading_dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|(dt, _)| dt.date_naive()).collect()
    }
}

/// Trading dates in `calendar` that have no corresponding row in `table` —
/// the set a vendor re-fetch should backfill.
pub fn missing_trading_dates(calendar: &SessionTable, table: &ColumnarBarTable) -> Vec<NaiveDate> {
    let present = table.trading_dates();
    calendar
        .sessions()
        .iter()
        .map(|(open, _)| open.date_naive())
        .filter(|date| !present.contains(date))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Calendar, Market};
    use rust_decimal_macros::dec;

    #[test]
    fn missing_dates_are_those_without_a_row() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();
        let table = Calendar::sessions(Market::Nyse, start, end).unwrap();

        let present_open = table.sessions()[0].0;
        let bar_table = ColumnarBarTable::from_rows(vec![Bar {
            datetime: present_open,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
        }]);

        let missing = missing_trading_dates(&table, &bar_table);
        assert_eq!(missing.len(), table.sessions().len() - 1);
    }
}
