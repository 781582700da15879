use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV record over one [`Timestep`](crate::source::Timestep).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub datetime: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// An ascending-by-`datetime` table of [`Bar`]s for one asset/timestep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bars {
    rows: Vec<Bar>,
}

impl Bars {
    pub fn new(mut rows: Vec<Bar>) -> Self {
        rows.sort_by_key(|bar| bar.datetime);
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Bar] {
        &self.rows
    }

    /// The last `length` bars strictly ending at or before `cutoff`.
    ///
    /// This is the look-ahead-safe lookup `DataSource::get_historical_prices`
    /// is built on: no row with `datetime > cutoff` is ever returned.
    pub fn as_of(&self, length: usize, cutoff: DateTime<Utc>) -> Bars {
        let end = self.rows.partition_point(|bar| bar.datetime <= cutoff);
        let start = end.saturating_sub(length);
        Bars::new(self.rows[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(hour: u32) -> Bar {
        Bar {
            datetime: DateTime::parse_from_rfc3339(&format!("2024-01-02T{hour:02}:00:00Z"))
                .unwrap()
                .with_timezone(&Utc),
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1000),
        }
    }

    #[test]
    fn as_of_never_leaks_future_bars() {
        let bars = Bars::new(vec![bar(9), bar(10), bar(11)]);
        let cutoff = bar(10).datetime;
        let recent = bars.as_of(2, cutoff);
        assert_eq!(recent.len(), 2);
        assert!(recent.rows().iter().all(|b| b.datetime <= cutoff));
    }

    #[test]
    fn as_of_caps_at_available_rows() {
        let bars = Bars::new(vec![bar(9)]);
        let recent = bars.as_of(5, bar(9).datetime);
        assert_eq!(recent.len(), 1);
    }
}
