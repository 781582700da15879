use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument category. Determines which of an [`Asset`]'s option-only
/// fields are meaningful.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Stock,
    Option,
    Forex,
    Crypto,
}

/// Option contract right.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Right {
    Call,
    Put,
}

/// Identity of a tradable instrument.
///
/// Two [`Asset`]s are equal iff every field below is equal. Immutable
/// after construction — mutate by building a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub asset_type: AssetType,
    /// Free-text display name, not used by any broker logic.
    pub name: Option<String>,
    pub expiration: Option<NaiveDate>,
    pub strike: Option<Decimal>,
    pub right: Option<Right>,
    pub multiplier: u32,
}

impl Asset {
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            asset_type: AssetType::Stock,
            name: None,
            expiration: None,
            strike: None,
            right: None,
            multiplier: 1,
        }
    }

    pub fn forex(symbol: impl Into<String>) -> Self {
        Self {
            asset_type: AssetType::Forex,
            ..Self::stock(symbol)
        }
    }

    pub fn crypto(symbol: impl Into<String>) -> Self {
        Self {
            asset_type: AssetType::Crypto,
            ..Self::stock(symbol)
        }
    }

    pub fn option(
        symbol: impl Into<String>,
        expiration: NaiveDate,
        strike: Decimal,
        right: Right,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            asset_type: AssetType::Option,
            name: None,
            expiration: Some(expiration),
            strike: Some(strike),
            right: Some(right),
            multiplier: 100,
        }
    }

    pub fn is_option(&self) -> bool {
        self.asset_type == AssetType::Option
    }

    /// The underlying stock [`Asset`] for an option contract, used when
    /// looking up the last price for cash settlement.
    pub fn underlying(&self) -> Asset {
        Asset::stock(self.symbol.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn equality_is_structural() {
        let a = Asset::stock("AAPL");
        let b = Asset::stock("AAPL");
        assert_eq!(a, b);

        let c = Asset::stock("MSFT");
        assert_ne!(a, c);
    }

    #[test]
    fn option_defaults_multiplier_to_100() {
        let expiration = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let call = Asset::option("AAPL", expiration, dec!(100), Right::Call);
        assert_eq!(call.multiplier, 100);
        assert!(call.is_option());
    }

    #[test]
    fn underlying_strips_option_fields() {
        let expiration = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let call = Asset::option("AAPL", expiration, dec!(100), Right::Call);
        let underlying = call.underlying();
        assert_eq!(underlying, Asset::stock("AAPL"));
    }
}
