use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::currency::CurrencyCode;
use crate::model::market::Market;
use crate::model::monetary::MonetaryAmount;
use crate::model::trade::TradeSide;

/// One price level: `price` is quote-per-base, `amount` is in base currency.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct OrderBookLine {
    pub price: MonetaryAmount,
    pub amount: MonetaryAmount,
}

/// Time-stamped two-sided snapshot of a market order book.
///
/// Asks are sorted by ascending price, bids by descending price, so the
/// first line of each side is the top of book.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MarketOrderBook {
    market: Market,
    time: DateTime<Utc>,
    asks: Vec<OrderBookLine>,
    bids: Vec<OrderBookLine>,
}

pub const DEFAULT_DEPTH: usize = 10;

impl MarketOrderBook {
    pub fn new(
        market: Market,
        time: DateTime<Utc>,
        mut asks: Vec<OrderBookLine>,
        mut bids: Vec<OrderBookLine>,
    ) -> Self {
        asks.sort_by(|lhs, rhs| {
            lhs.price
                .partial_cmp(&rhs.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        bids.sort_by(|lhs, rhs| {
            rhs.price
                .partial_cmp(&lhs.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        MarketOrderBook {
            market,
            time,
            asks,
            bids,
        }
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn asks(&self) -> &[OrderBookLine] {
        &self.asks
    }

    pub fn bids(&self) -> &[OrderBookLine] {
        &self.bids
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLine> {
        self.asks.first()
    }

    pub fn best_bid(&self) -> Option<&OrderBookLine> {
        self.bids.first()
    }

    pub fn lowest_ask_price(&self) -> Option<MonetaryAmount> {
        self.best_ask().map(|line| line.price)
    }

    pub fn highest_bid_price(&self) -> Option<MonetaryAmount> {
        self.best_bid().map(|line| line.price)
    }

    /// Midpoint of best bid and best ask.
    pub fn average_price(&self) -> Option<MonetaryAmount> {
        let bid = self.highest_bid_price()?;
        let ask = self.lowest_ask_price()?;
        bid.checked_add(ask)
            .and_then(|sum| sum.checked_div(MonetaryAmount::from_int(2, CurrencyCode::neutral())))
            .ok()
    }

    /// Smallest price increment expressible at this book's precision.
    pub fn tick_size(&self) -> Option<MonetaryAmount> {
        let nb_decimals = self
            .asks
            .iter()
            .chain(self.bids.iter())
            .map(|line| line.price.nb_decimals())
            .max()?;
        Some(MonetaryAmount::new(1, self.market.quote(), nb_decimals))
    }

    /// Converts `from` at market by walking the relevant side level by
    /// level. Returns `None` when the snapshot depth cannot absorb the
    /// amount, or when `from` belongs to neither side of the market.
    pub fn convert(&self, from: MonetaryAmount) -> Option<MonetaryAmount> {
        if from.currency() == self.market.base() {
            // Sell base into quote, walking bids from the top.
            let mut remaining = from;
            let mut total = MonetaryAmount::zero(self.market.quote());
            for line in &self.bids {
                let matched = if remaining <= line.amount {
                    remaining
                } else {
                    line.amount
                };
                let quote = matched.to_neutral().checked_mul(line.price).ok()?;
                total = total.checked_add(quote).ok()?;
                remaining = remaining.checked_sub(matched).ok()?;
                if remaining.is_zero() {
                    return Some(total);
                }
            }
            None
        } else if from.currency() == self.market.quote() {
            // Buy base with quote, walking asks from the top.
            let mut remaining = from;
            let mut total = MonetaryAmount::zero(self.market.base());
            for line in &self.asks {
                let level_cost = line.amount.to_neutral().checked_mul(line.price).ok()?;
                let matched_base = if remaining < level_cost {
                    remaining
                        .checked_div(line.price)
                        .ok()?
                        .with_currency(self.market.base())
                } else {
                    line.amount
                };
                total = total.checked_add(matched_base).ok()?;
                remaining = remaining
                    .checked_sub(if remaining < level_cost { remaining } else { level_cost })
                    .ok()?;
                if remaining.is_zero() {
                    return Some(total);
                }
            }
            None
        } else {
            None
        }
    }

    /// Volume-weighted average price obtained when crossing the book with
    /// `from`, considering at most `depth` levels. `from` may be expressed
    /// in base (sell) or quote (buy).
    pub fn avg_price_for(&self, from: MonetaryAmount, depth: usize) -> Option<MonetaryAmount> {
        let side = if from.currency() == self.market.base() {
            TradeSide::Sell
        } else if from.currency() == self.market.quote() {
            TradeSide::Buy
        } else {
            return None;
        };
        let levels = match side {
            TradeSide::Sell => &self.bids,
            TradeSide::Buy => &self.asks,
        };
        let mut remaining = from;
        let mut total_base = MonetaryAmount::zero(self.market.base());
        let mut total_quote = MonetaryAmount::zero(self.market.quote());
        for line in levels.iter().take(depth) {
            let (matched_base, matched_quote) = match side {
                TradeSide::Sell => {
                    let base = if remaining <= line.amount {
                        remaining
                    } else {
                        line.amount
                    };
                    let quote = base.to_neutral().checked_mul(line.price).ok()?;
                    remaining = remaining.checked_sub(base).ok()?;
                    (base, quote)
                }
                TradeSide::Buy => {
                    let level_cost = line.amount.to_neutral().checked_mul(line.price).ok()?;
                    let quote = if remaining < level_cost {
                        remaining
                    } else {
                        level_cost
                    };
                    let base = quote
                        .checked_div(line.price)
                        .ok()?
                        .with_currency(self.market.base());
                    remaining = remaining.checked_sub(quote).ok()?;
                    (base, quote)
                }
            };
            total_base = total_base.checked_add(matched_base).ok()?;
            total_quote = total_quote.checked_add(matched_quote).ok()?;
            if remaining.is_zero() {
                break;
            }
        }
        if total_base.is_zero() {
            return None;
        }
        total_quote
            .checked_div(total_base.to_neutral())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: &str, amount: &str) -> OrderBookLine {
        OrderBookLine {
            price: price.into(),
            amount: amount.into(),
        }
    }

    fn xlm_btc_book() -> MarketOrderBook {
        MarketOrderBook::new(
            Market::new("XLM", "BTC"),
            Utc::now(),
            vec![line("0.000017 BTC", "40000 XLM"), line("0.000018 BTC", "50000 XLM")],
            vec![line("0.000016 BTC", "25000 XLM"), line("0.000015 BTC", "80000 XLM")],
        )
    }

    #[test]
    fn top_of_book() {
        let book = xlm_btc_book();
        assert_eq!(book.lowest_ask_price(), Some("0.000017 BTC".into()));
        assert_eq!(book.highest_bid_price(), Some("0.000016 BTC".into()));
    }

    #[test]
    fn average_price_is_midpoint() {
        let book = xlm_btc_book();
        assert_eq!(book.average_price(), Some("0.0000165 BTC".into()));
    }

    #[test]
    fn convert_sell_walks_bids() {
        let book = xlm_btc_book();
        // 25000 at 0.000016 + 5000 at 0.000015
        assert_eq!(
            book.convert("30000 XLM".into()),
            Some("0.475 BTC".into())
        );
    }

    #[test]
    fn convert_buy_walks_asks() {
        let book = xlm_btc_book();
        // 0.68 BTC buys exactly the 40000 XLM of the first ask level.
        assert_eq!(book.convert("0.68 BTC".into()), Some("40000 XLM".into()));
    }

    #[test]
    fn convert_fails_beyond_depth() {
        let book = xlm_btc_book();
        assert_eq!(book.convert("1000000 XLM".into()), None);
    }

    #[test]
    fn convert_rejects_foreign_currency() {
        let book = xlm_btc_book();
        assert_eq!(book.convert("10 EUR".into()), None);
    }

    #[test]
    fn avg_price_weights_levels() {
        let book = xlm_btc_book();
        // Selling 30000: 25000*0.000016 + 5000*0.000015 = 0.475 over 30000.
        let avg = book.avg_price_for("30000 XLM".into(), DEFAULT_DEPTH).unwrap();
        assert_eq!(avg, "0.000015833333333333 BTC".into());
    }

    #[test]
    fn tick_size_follows_price_precision() {
        let book = xlm_btc_book();
        assert_eq!(book.tick_size(), Some("0.000001 BTC".into()));
    }
}
