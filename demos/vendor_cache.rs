//! Illustrative interface for a vendor historical-data client with an
//! on-disk cache, out of the core budget (`spec.md` #1/#2's "Cache loader
//! (illustrative)").
//!
//! Mirrors `original_source/lumibot/tools/thetadata_helper.py`'s shape:
//! fetch a date range from a vendor HTTP API, persist it to
//! `candlewick_data::cache::ColumnarBarTable`'s on-disk representation,
//! and only re-fetch the dates `missing_trading_dates` reports absent.
//! Not wired into the workspace: no HTTP client, no on-disk format, no
//! vendor auth — those belong to the adapter crate this stands in for.

use candlewick_data::cache::ColumnarBarTable;
use candlewick_instrument::Asset;
use chrono::NaiveDate;

pub trait VendorDataClient {
    type Error;

    /// Fetch `[start, end]` of daily/minute bars for `asset` from the
    /// vendor, to be merged into the local cache by the caller.
    fn fetch_range(&self, asset: &Asset, start: NaiveDate, end: NaiveDate) -> Result<ColumnarBarTable, Self::Error>;
}
