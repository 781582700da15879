use crate::order::OrderId;
use candlewick_data::DataSourceError;
use candlewick_instrument::Asset;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error("order {0} is not tracked by this broker")]
    UnknownOrder(OrderId),
    #[error("{0:?} is not an option contract")]
    NotAnOption(Asset),
    #[error("no open position in {asset:?} for strategy {strategy}")]
    NoPosition { strategy: String, asset: Asset },
}
