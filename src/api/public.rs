use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::api::fiat::FiatConverter;
use crate::api::path::{MarketPathMode, PathSearch};
use crate::context::{AppContext, FeeType};
use crate::errors::{ExchangeError, Result};
use crate::model::currency::CurrencyCode;
use crate::model::market::Market;
use crate::model::monetary::MonetaryAmount;
use crate::model::orderbook::MarketOrderBook;
use crate::model::trade::{PriceStrategy, PublicTrade, TradeSide};
use crate::model::wallet::CurrencyExchange;

pub type MarketSet = BTreeSet<Market>;
pub type CurrencyExchangeSet = BTreeSet<CurrencyExchange>;
pub type MarketPriceMap = HashMap<Market, MonetaryAmount>;
pub type MarketOrderBookMap = HashMap<Market, MarketOrderBook>;
pub type WithdrawalFeeMap = HashMap<CurrencyCode, MonetaryAmount>;

pub const DEFAULT_NB_LAST_TRADES: usize = 100;

/// Capability set every venue adapter provides for public (keyless) data.
///
/// Operations return domain types only; whether a call hits the network or
/// is served from the adapter's cache vault is the adapter's own business.
pub trait VenuePublicApi: Send + Sync {
    /// Lowercase, stable venue name.
    fn name(&self) -> &'static str;

    fn health_check(&self) -> Result<bool>;

    fn tradable_currencies(&self) -> Result<CurrencyExchangeSet>;

    /// Venue-specific view of a standard currency code.
    fn convert_std_currency(&self, cur: CurrencyCode) -> Result<CurrencyExchange> {
        self.tradable_currencies()?
            .into_iter()
            .find(|currency| currency.standard_code == cur)
            .ok_or_else(|| {
                ExchangeError::NotFound(format!("currency {cur} not found on {}", self.name()))
            })
    }

    fn tradable_markets(&self) -> Result<MarketSet>;

    /// Approximated prices for every market at once. Not necessarily up to
    /// date, but handy to get a lot of prices in one query.
    fn all_prices(&self) -> Result<MarketPriceMap>;

    fn all_order_books(&self, depth: usize) -> Result<MarketOrderBookMap>;

    fn order_book(&self, market: Market, depth: usize) -> Result<MarketOrderBook>;

    /// Total volume traded on the market in the last 24 hours.
    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount>;

    /// Most recent trades, ascending by time.
    fn last_trades(&self, market: Market, nb_trades: usize) -> Result<Vec<PublicTrade>>;

    fn last_price(&self, market: Market) -> Result<MonetaryAmount>;

    fn withdrawal_fees(&self) -> Result<WithdrawalFeeMap>;

    fn withdrawal_fee(&self, cur: CurrencyCode) -> Result<Option<MonetaryAmount>> {
        Ok(self.withdrawal_fees()?.get(&cur).copied())
    }

    /// Whether the withdrawal fees come from a live venue endpoint or from
    /// a static, possibly stale source.
    fn is_withdrawal_fees_source_reliable(&self) -> bool {
        false
    }

    /// Consistent snapshot of this adapter's cache vault.
    fn dump_caches(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Restores a snapshot produced by [`Self::dump_caches`].
    fn load_caches(&self, _snapshot: &serde_json::Value) {}
}

/// Shortest conversion path on this venue's markets.
pub fn find_markets_path(
    api: &dyn VenuePublicApi,
    ctx: &AppContext,
    from: CurrencyCode,
    to: CurrencyCode,
    mode: MarketPathMode,
) -> Result<Vec<Market>> {
    let markets = api.tradable_markets()?;
    Ok(PathSearch {
        markets: &markets,
        fiats: ctx.fiats(),
        stablecoins: ctx.stablecoins(),
        mode,
    }
    .find_markets_path(from, to))
}

/// Ordered currencies visited by the shortest conversion path.
pub fn find_currencies_path(
    api: &dyn VenuePublicApi,
    ctx: &AppContext,
    from: CurrencyCode,
    to: CurrencyCode,
    mode: MarketPathMode,
) -> Result<Vec<CurrencyCode>> {
    let markets = api.tradable_markets()?;
    Ok(PathSearch {
        markets: &markets,
        fiats: ctx.fiats(),
        stablecoins: ctx.stablecoins(),
        mode,
    }
    .find_currencies_path(from, to))
}

/// The market of `(c1, c2)` in the orientation the venue declares it.
pub fn retrieve_market(
    api: &dyn VenuePublicApi,
    c1: CurrencyCode,
    c2: CurrencyCode,
) -> Result<Option<Market>> {
    Ok(retrieve_market_from_set(c1, c2, &api.tradable_markets()?))
}

pub fn retrieve_market_from_set(
    c1: CurrencyCode,
    c2: CurrencyCode,
    markets: &MarketSet,
) -> Option<Market> {
    let straight = Market::new(c1, c2);
    if markets.contains(&straight) {
        return Some(straight);
    }
    let reversed = straight.reverse();
    markets.contains(&reversed).then_some(reversed)
}

/// Splits a concatenated symbol such as `btcusdt` into a known market.
///
/// When `filter_markets` is not empty only its members are considered;
/// otherwise the venue's tradable markets are queried. With a pinned
/// currency the split point is resolved against the pin alone, which also
/// works for venues whose market list is unavailable.
pub fn determine_market_from_string(
    api: &dyn VenuePublicApi,
    symbol: &str,
    filter_markets: &MarketSet,
    pinned_cur: Option<CurrencyCode>,
) -> Result<Option<Market>> {
    if let Some(market) = split_market_with_pin(symbol, pinned_cur)? {
        return Ok(Some(market));
    }
    let markets;
    let markets = if filter_markets.is_empty() {
        markets = api.tradable_markets()?;
        &markets
    } else {
        filter_markets
    };
    split_market_in(symbol, markets)
}

/// Resolves the split point of a concatenated symbol against a pinned
/// currency at its front or back.
fn split_market_with_pin(symbol: &str, pinned_cur: Option<CurrencyCode>) -> Result<Option<Market>> {
    let upper = symbol.trim().to_ascii_uppercase();
    let Some(pin) = pinned_cur else {
        return Ok(None);
    };
    let pin = pin.as_str();
    if let Some(rest) = upper.strip_prefix(pin) {
        if !rest.is_empty() {
            return Ok(Some(Market::new(
                CurrencyCode::new(pin)?,
                CurrencyCode::new(rest)?,
            )));
        }
    }
    if let Some(rest) = upper.strip_suffix(pin) {
        if !rest.is_empty() {
            return Ok(Some(Market::new(
                CurrencyCode::new(rest)?,
                CurrencyCode::new(pin)?,
            )));
        }
    }
    Ok(None)
}

/// Tries every split point of a concatenated symbol against a market set,
/// returning the market in its declared orientation.
fn split_market_in(symbol: &str, markets: &MarketSet) -> Result<Option<Market>> {
    let upper = symbol.trim().to_ascii_uppercase();
    for split in 1..upper.len() {
        let (lhs, rhs) = upper.split_at(split);
        let (Ok(lhs), Ok(rhs)) = (CurrencyCode::new(lhs), CurrencyCode::new(rhs)) else {
            continue;
        };
        if let Some(market) = retrieve_market_from_set(lhs, rhs, markets) {
            return Ok(Some(market));
        }
    }
    Ok(None)
}

/// Converts `amount` into `to` using average (midpoint) prices along the
/// fastest conversion path, netting venue fees on each real leg.
/// `None` when no path exists or the data needed is missing.
pub fn convert_at_average_price(
    api: &dyn VenuePublicApi,
    ctx: &AppContext,
    fiat_converter: &FiatConverter,
    amount: MonetaryAmount,
    to: CurrencyCode,
) -> Result<Option<MonetaryAmount>> {
    if amount.currency() == to {
        return Ok(Some(amount));
    }
    let path = find_markets_path(
        api,
        ctx,
        amount.currency(),
        to,
        MarketPathMode::WithFiatConversionAtExtremity,
    )?;
    if path.is_empty() {
        return Ok(None);
    }
    let venue_config = ctx.venue_config(api.name());
    let mut current = amount;
    let mut all_prices: Option<MarketPriceMap> = None;
    for market in path {
        if market.is_fiat_conversion() {
            // A synthetic leg converts through the fiat the currencies
            // alias to, then re-tags.
            let from_fiat = ctx
                .stablecoin_fiat(current.currency())
                .unwrap_or(current.currency());
            let to_cur = market.opposite_of(current.currency()).unwrap_or(market.quote());
            let to_fiat = ctx.stablecoin_fiat(to_cur).unwrap_or(to_cur);
            let Some(converted) = fiat_converter.convert(current.with_currency(from_fiat), to_fiat)?
            else {
                return Ok(None);
            };
            current = converted.with_currency(to_cur);
            continue;
        }
        // Midpoint from the order book when available, all-prices fallback.
        let price = match api.order_book(market, crate::model::orderbook::DEFAULT_DEPTH) {
            Ok(book) => book.average_price(),
            Err(err) => {
                debug!("no order book for {market} on {}: {err}", api.name());
                None
            }
        };
        let price = match price {
            Some(price) => price,
            None => {
                if all_prices.is_none() {
                    all_prices = Some(api.all_prices()?);
                }
                match all_prices.as_ref().and_then(|prices| prices.get(&market)) {
                    Some(price) => *price,
                    None => return Ok(None),
                }
            }
        };
        let converted = if current.currency() == market.base() {
            current.to_neutral().checked_mul(price)?
        } else {
            current
                .checked_div(price)?
                .with_currency(market.base())
        };
        current = venue_config.apply_fee(converted, FeeType::Maker);
    }
    Ok(Some(current))
}

/// Trading side implied by the currency being spent on a market.
pub fn side_of(from: MonetaryAmount, market: Market) -> Result<TradeSide> {
    if from.currency() == market.base() {
        Ok(TradeSide::Sell)
    } else if from.currency() == market.quote() {
        Ok(TradeSide::Buy)
    } else {
        Err(ExchangeError::InvalidArgument(format!(
            "{} does not belong to market {market}",
            from.currency()
        )))
    }
}

/// Limit price for an order per the given strategy.
///
/// Maker joins the queue on its own side of the book, nibble places one
/// tick inside the spread, taker crosses at the opposite-side top of book.
pub fn compute_limit_order_price(
    book: &MarketOrderBook,
    from: MonetaryAmount,
    strategy: PriceStrategy,
) -> Result<MonetaryAmount> {
    let side = side_of(from, book.market())?;
    let no_price = || {
        ExchangeError::NotFound(format!(
            "order book of {} is too shallow to compute a price",
            book.market()
        ))
    };
    let bid = book.highest_bid_price();
    let ask = book.lowest_ask_price();
    let price = match (strategy, side) {
        (PriceStrategy::Maker, TradeSide::Buy) => bid,
        (PriceStrategy::Maker, TradeSide::Sell) => ask,
        (PriceStrategy::Taker, TradeSide::Buy) => ask,
        (PriceStrategy::Taker, TradeSide::Sell) => bid,
        (PriceStrategy::Nibble, _) => {
            let tick = book.tick_size().ok_or_else(no_price)?;
            match side {
                TradeSide::Buy => Some(bid.ok_or_else(no_price)?.checked_add(tick)?),
                TradeSide::Sell => Some(ask.ok_or_else(no_price)?.checked_sub(tick)?),
            }
        }
    };
    price.ok_or_else(no_price)
}

/// Volume-weighted average price obtained by crossing the book with `from`
/// over at most `depth` levels; maker and nibble orders do not cross, so
/// their limit price is returned unchanged.
pub fn compute_avg_order_price(
    book: &MarketOrderBook,
    from: MonetaryAmount,
    strategy: PriceStrategy,
    depth: usize,
) -> Result<MonetaryAmount> {
    match strategy {
        PriceStrategy::Maker | PriceStrategy::Nibble => {
            compute_limit_order_price(book, from, strategy)
        }
        PriceStrategy::Taker => book
            .avg_price_for(from, depth)
            .map_or_else(|| compute_limit_order_price(book, from, strategy), Ok),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::orderbook::OrderBookLine;
    use chrono::Utc;

    fn markets() -> MarketSet {
        [
            Market::new("BTC", "USDT"),
            Market::new("BTC", "KRW"),
            Market::new("AVAX", "ICP"),
        ]
        .into_iter()
        .collect()
    }

    fn btc_eur_book() -> MarketOrderBook {
        let line = |price: &str, amount: &str| OrderBookLine {
            price: price.into(),
            amount: amount.into(),
        };
        MarketOrderBook::new(
            Market::new("BTC", "EUR"),
            Utc::now(),
            vec![line("30010 EUR", "2 BTC"), line("30020 EUR", "5 BTC")],
            vec![line("30000 EUR", "1 BTC"), line("29990 EUR", "4 BTC")],
        )
    }

    #[test]
    fn retrieve_market_prefers_declared_orientation() {
        let markets = markets();
        assert_eq!(
            retrieve_market_from_set("KRW".into(), "BTC".into(), &markets),
            Some(Market::new("BTC", "KRW"))
        );
        assert_eq!(
            retrieve_market_from_set("BTC".into(), "KRW".into(), &markets),
            Some(Market::new("BTC", "KRW"))
        );
        assert_eq!(
            retrieve_market_from_set("EUR".into(), "EOS".into(), &markets),
            None
        );
    }

    #[test]
    fn split_symbol_against_market_set() {
        let markets = markets();
        assert_eq!(
            split_market_in("btcusdt", &markets).unwrap(),
            Some(Market::new("BTC", "USDT"))
        );
        assert_eq!(
            split_market_in("icpavax", &markets).unwrap(),
            Some(Market::new("AVAX", "ICP"))
        );
        assert_eq!(
            split_market_in("krwbtc", &markets).unwrap(),
            Some(Market::new("BTC", "KRW"))
        );
        assert_eq!(split_market_in("ethusd", &markets).unwrap(), None);
    }

    #[test]
    fn split_symbol_with_pin_needs_no_market_list() {
        assert_eq!(
            split_market_with_pin("btcusdt", Some("BTC".into())).unwrap(),
            Some(Market::new("BTC", "USDT"))
        );
        assert_eq!(
            split_market_with_pin("btcusdt", Some("USDT".into())).unwrap(),
            Some(Market::new("BTC", "USDT"))
        );
        assert_eq!(split_market_with_pin("btcusdt", None).unwrap(), None);
    }

    #[test]
    fn limit_price_per_strategy() {
        let book = btc_eur_book();
        let selling: MonetaryAmount = "1 BTC".into();
        let buying: MonetaryAmount = "5000 EUR".into();

        // Maker joins the same side of the book.
        assert_eq!(
            compute_limit_order_price(&book, selling, PriceStrategy::Maker).unwrap(),
            "30010 EUR".into()
        );
        assert_eq!(
            compute_limit_order_price(&book, buying, PriceStrategy::Maker).unwrap(),
            "30000 EUR".into()
        );
        // Taker crosses to the opposite side.
        assert_eq!(
            compute_limit_order_price(&book, selling, PriceStrategy::Taker).unwrap(),
            "30000 EUR".into()
        );
        assert_eq!(
            compute_limit_order_price(&book, buying, PriceStrategy::Taker).unwrap(),
            "30010 EUR".into()
        );
        // Nibble places one tick inside the spread.
        assert_eq!(
            compute_limit_order_price(&book, selling, PriceStrategy::Nibble).unwrap(),
            "30009 EUR".into()
        );
        assert_eq!(
            compute_limit_order_price(&book, buying, PriceStrategy::Nibble).unwrap(),
            "30001 EUR".into()
        );
    }

    #[test]
    fn avg_order_price_walks_crossed_levels() {
        let book = btc_eur_book();
        // Selling 3 BTC crosses 1 at 30000 then 2 at 29990.
        let avg = compute_avg_order_price(&book, "3 BTC".into(), PriceStrategy::Taker, 10)
            .unwrap();
        assert!(avg < "30000 EUR".into() && avg > "29990 EUR".into());
        // A maker order does not cross: the limit price is returned.
        assert_eq!(
            compute_avg_order_price(&book, "3 BTC".into(), PriceStrategy::Maker, 10).unwrap(),
            "30010 EUR".into()
        );
    }

    #[test]
    fn side_is_implied_by_the_spent_currency() {
        let market = Market::new("BTC", "EUR");
        assert_eq!(side_of("1 BTC".into(), market).unwrap(), TradeSide::Sell);
        assert_eq!(side_of("100 EUR".into(), market).unwrap(), TradeSide::Buy);
        assert!(side_of("1 ETH".into(), market).is_err());
    }
}
