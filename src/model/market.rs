use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ExchangeError, Result};
use crate::model::currency::CurrencyCode;

/// Distinguishes real venue markets from synthetic legs spliced in by the
/// conversion path engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    #[default]
    Spot,
    /// Synthetic leg representing a fiat cross-rate or stablecoin alias.
    FiatConversion,
}

/// Ordered currency pair `(base, quote)` tradable on a venue.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Market {
    base: CurrencyCode,
    quote: CurrencyCode,
    #[serde(default, skip_serializing_if = "is_spot")]
    kind: MarketType,
}

fn is_spot(kind: &MarketType) -> bool {
    *kind == MarketType::Spot
}

impl Market {
    pub fn new(base: impl Into<CurrencyCode>, quote: impl Into<CurrencyCode>) -> Self {
        Market {
            base: base.into(),
            quote: quote.into(),
            kind: MarketType::Spot,
        }
    }

    pub fn fiat_conversion(
        base: impl Into<CurrencyCode>,
        quote: impl Into<CurrencyCode>,
    ) -> Self {
        Market {
            base: base.into(),
            quote: quote.into(),
            kind: MarketType::FiatConversion,
        }
    }

    pub fn base(&self) -> CurrencyCode {
        self.base
    }

    pub fn quote(&self) -> CurrencyCode {
        self.quote
    }

    pub fn kind(&self) -> MarketType {
        self.kind
    }

    pub fn is_fiat_conversion(&self) -> bool {
        self.kind == MarketType::FiatConversion
    }

    /// Swapped pair, same type.
    pub fn reverse(&self) -> Self {
        Market {
            base: self.quote,
            quote: self.base,
            kind: self.kind,
        }
    }

    pub fn contains(&self, cur: CurrencyCode) -> bool {
        self.base == cur || self.quote == cur
    }

    /// The other currency of the pair, if `cur` belongs to it.
    pub fn opposite_of(&self, cur: CurrencyCode) -> Option<CurrencyCode> {
        if cur == self.base {
            Some(self.quote)
        } else if cur == self.quote {
            Some(self.base)
        } else {
            None
        }
    }

    pub fn is_defined(&self) -> bool {
        !self.base.is_neutral() && !self.quote.is_neutral()
    }

    /// Concatenated pair string with a custom separator, e.g. `BTCUSDT` or
    /// `BTC_KRW`, as venue endpoints expect.
    pub fn assets_pair_str(&self, sep: &str) -> String {
        format!("{}{}{}", self.base, sep, self.quote)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl fmt::Debug for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MarketType::Spot => write!(f, "Market({}-{})", self.base, self.quote),
            MarketType::FiatConversion => write!(f, "Market({}-{}*)", self.base, self.quote),
        }
    }
}

impl FromStr for Market {
    type Err = ExchangeError;

    /// Parses a dash-separated pair such as `BTC-EUR` or `btc-eur`.
    fn from_str(s: &str) -> Result<Self> {
        let (base, quote) = s.split_once('-').ok_or_else(|| {
            ExchangeError::InvalidArgument(format!("market '{s}' should be of the form BASE-QUOTE"))
        })?;
        Ok(Market {
            base: CurrencyCode::new(base)?,
            quote: CurrencyCode::new(quote)?,
            kind: MarketType::Spot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_swaps_pair() {
        let mk = Market::new("BTC", "EUR");
        assert_eq!(mk.reverse(), Market::new("EUR", "BTC"));
        assert_eq!(mk.reverse().reverse(), mk);
    }

    #[test]
    fn opposite_of_either_side() {
        let mk = Market::new("ETH", "BTC");
        assert_eq!(mk.opposite_of("ETH".into()), Some("BTC".into()));
        assert_eq!(mk.opposite_of("BTC".into()), Some("ETH".into()));
        assert_eq!(mk.opposite_of("EUR".into()), None);
    }

    #[test]
    fn fiat_conversion_markets_are_distinct() {
        assert_ne!(
            Market::new("USDT", "KRW"),
            Market::fiat_conversion("USDT", "KRW")
        );
    }

    #[test]
    fn parses_dash_pair() {
        let mk: Market = "xlm-eur".parse().unwrap();
        assert_eq!(mk, Market::new("XLM", "EUR"));
        assert!("xlmeur".parse::<Market>().is_err());
    }
}
