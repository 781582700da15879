//! Market calendars, OHLCV [`Bar`] storage, and the backtesting
//! [`DataSource`] that owns the virtual clock and serves look-ahead-safe
//! historical prices.

pub mod bar;
pub mod cache;
pub mod calendar;
pub mod source;

pub use bar::{Bar, Bars};
pub use calendar::{Calendar, CalendarError, Market, SessionTable};
pub use source::{ClockAdvance, DataSource, DataSourceError, HistoricalDataSource, Timestep};
