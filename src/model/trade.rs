use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::currency::CurrencyCode;
use crate::model::market::Market;
use crate::model::monetary::MonetaryAmount;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn opposite(self) -> TradeSide {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        })
    }
}

/// One anonymous trade published by a venue.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PublicTrade {
    pub side: TradeSide,
    pub amount: MonetaryAmount,
    pub price: MonetaryAmount,
    pub time: DateTime<Utc>,
}

/// Net result of a trade leg: what was spent and what was obtained.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct TradedAmounts {
    pub from: MonetaryAmount,
    pub to: MonetaryAmount,
}

impl TradedAmounts {
    pub fn new(from: MonetaryAmount, to: MonetaryAmount) -> Self {
        TradedAmounts { from, to }
    }

    pub fn zero(from_currency: CurrencyCode, to_currency: CurrencyCode) -> Self {
        TradedAmounts {
            from: MonetaryAmount::zero(from_currency),
            to: MonetaryAmount::zero(to_currency),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.from.is_zero() && self.to.is_zero()
    }
}

impl fmt::Display for TradedAmounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "traded {} into {}", self.from, self.to)
    }
}

/// Price placement strategy relative to top of book.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceStrategy {
    /// Do not cross the book: best bid when selling, best ask when buying.
    #[default]
    Maker,
    /// One tick inside the spread.
    Nibble,
    /// Opposite-side top of book, crossing immediately.
    Taker,
}

/// What to do with the unmatched part when the trade deadline expires.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    #[default]
    Cancel,
    /// Replace the rest with a taker order.
    Match,
}

#[derive(Clone, Debug)]
pub struct TradeOptions {
    pub price_strategy: PriceStrategy,
    pub max_trade_time: Duration,
    pub min_time_between_price_updates: Duration,
    pub timeout_action: TimeoutAction,
    pub is_simulation: bool,
}

impl Default for TradeOptions {
    fn default() -> Self {
        TradeOptions {
            price_strategy: PriceStrategy::Maker,
            max_trade_time: Duration::from_secs(30),
            min_time_between_price_updates: Duration::from_secs(5),
            timeout_action: TimeoutAction::Cancel,
            is_simulation: false,
        }
    }
}

/// Immutable context handed to adapters when placing an order.
#[derive(Clone, Debug)]
pub struct TradeInfo {
    pub market: Market,
    pub side: TradeSide,
    pub options: TradeOptions,
}

pub type OrderId = String;

/// An order as reported by a venue.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market: Market,
    pub side: TradeSide,
    pub price: MonetaryAmount,
    pub matched_volume: MonetaryAmount,
    pub remaining_volume: MonetaryAmount,
    pub placed_time: DateTime<Utc>,
}

/// Matched amounts and terminal status of a single order.
#[derive(Clone, PartialEq, Debug)]
pub struct OrderInfo {
    pub traded: TradedAmounts,
    pub is_closed: bool,
}

/// Result of an order placement.
#[derive(Clone, PartialEq, Debug)]
pub struct PlaceOrderInfo {
    pub order_id: OrderId,
    pub traded: TradedAmounts,
    pub is_closed: bool,
    /// Set when the order was only simulated, not placed for real.
    pub is_simulation: bool,
}

/// Filter applied to order listing and cancellation.
#[derive(Clone, Debug, Default)]
pub struct OrdersConstraints {
    pub cur1: Option<CurrencyCode>,
    pub cur2: Option<CurrencyCode>,
    pub side: Option<TradeSide>,
    pub placed_after: Option<DateTime<Utc>>,
    pub placed_before: Option<DateTime<Utc>>,
    pub ids: BTreeSet<OrderId>,
}

impl OrdersConstraints {
    pub fn with_currency(cur: CurrencyCode) -> Self {
        OrdersConstraints {
            cur1: Some(cur),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cur1.is_none()
            && self.cur2.is_none()
            && self.side.is_none()
            && self.placed_after.is_none()
            && self.placed_before.is_none()
            && self.ids.is_empty()
    }

    pub fn accepts_market(&self, market: Market) -> bool {
        let cur_ok = |cur: Option<CurrencyCode>| cur.is_none_or(|cur| market.contains(cur));
        cur_ok(self.cur1) && cur_ok(self.cur2)
    }

    pub fn accepts(&self, order: &Order) -> bool {
        self.accepts_market(order.market)
            && self.side.is_none_or(|side| order.side == side)
            && self.placed_after.is_none_or(|at| order.placed_time >= at)
            && self.placed_before.is_none_or(|at| order.placed_time <= at)
            && (self.ids.is_empty() || self.ids.contains(&order.id))
    }
}

/// A deposit as reported by a venue.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    pub amount: MonetaryAmount,
    pub time: DateTime<Utc>,
    pub is_settled: bool,
}

/// A withdrawal as reported by a venue.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Withdraw {
    pub id: String,
    pub amount: MonetaryAmount,
    pub fee: MonetaryAmount,
    pub time: DateTime<Utc>,
    pub is_sent: bool,
}

/// Filter applied to deposit / withdraw history queries.
#[derive(Clone, Debug, Default)]
pub struct TransferConstraints {
    pub currency: Option<CurrencyCode>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub ids: BTreeSet<String>,
}

impl TransferConstraints {
    pub fn with_currency(cur: CurrencyCode) -> Self {
        TransferConstraints {
            currency: Some(cur),
            ..Default::default()
        }
    }

    pub fn accepts_currency(&self, cur: CurrencyCode) -> bool {
        self.currency.is_none_or(|filter| filter == cur)
    }

    pub fn accepts_time(&self, time: DateTime<Utc>) -> bool {
        self.after.is_none_or(|at| time >= at) && self.before.is_none_or(|at| time <= at)
    }

    pub fn accepts_id(&self, id: &str) -> bool {
        self.ids.is_empty() || self.ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_constraints_filters_market_and_time() {
        let market = Market::new("BTC", "EUR");
        let order = Order {
            id: "42".into(),
            market,
            side: TradeSide::Buy,
            price: "30000 EUR".into(),
            matched_volume: "0 BTC".into(),
            remaining_volume: "1 BTC".into(),
            placed_time: Utc::now(),
        };
        assert!(OrdersConstraints::default().accepts(&order));
        assert!(OrdersConstraints::with_currency("BTC".into()).accepts(&order));
        assert!(!OrdersConstraints::with_currency("XRP".into()).accepts(&order));

        let mut by_side = OrdersConstraints::default();
        by_side.side = Some(TradeSide::Sell);
        assert!(!by_side.accepts(&order));
        by_side.side = Some(TradeSide::Buy);
        assert!(by_side.accepts(&order));

        let mut by_id = OrdersConstraints::default();
        by_id.ids.insert("43".into());
        assert!(!by_id.accepts(&order));
    }
}
