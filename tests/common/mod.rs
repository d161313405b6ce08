//! Mock venue implementations shared by the orchestrator test suites.
//! Each suite uses a different subset of the helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crosscex::api::fiat::{FiatConverter, StaticRateSource};
use crosscex::api::private::{BalanceMap, VenuePrivateApi};
use crosscex::api::public::{
    CurrencyExchangeSet, MarketOrderBookMap, MarketPriceMap, MarketSet, VenuePublicApi,
    WithdrawalFeeMap,
};
use crosscex::context::{AppContext, StaticReader};
use crosscex::errors::{ExchangeError, Result};
use crosscex::model::currency::CurrencyCode;
use crosscex::model::market::Market;
use crosscex::model::monetary::MonetaryAmount;
use crosscex::model::orderbook::{MarketOrderBook, OrderBookLine};
use crosscex::model::trade::{
    Deposit, Order, OrderInfo, OrdersConstraints, PlaceOrderInfo, PublicTrade, TradeInfo,
    TradeSide, TradedAmounts, TransferConstraints, Withdraw,
};
use crosscex::model::wallet::{
    CurrencyExchange, InitiatedWithdrawInfo, SentWithdrawInfo, Wallet,
};
use crosscex::orchestrator::{Exchange, ExchangeAccount, Orchestrator};
use crosscex::venues::VenueKind;

pub fn test_context() -> Arc<AppContext> {
    Arc::new(
        AppContext::from_readers(
            PathBuf::from(std::env::temp_dir()),
            None,
            &StaticReader("{}"),
            &StaticReader(r#"{"USDT": "USD"}"#),
            &StaticReader("{}"),
            &StaticReader("{}"),
        )
        .unwrap(),
    )
}

pub fn test_fiat_converter() -> Arc<FiatConverter> {
    Arc::new(FiatConverter::new(
        Box::new(
            StaticRateSource::default()
                .with_rate("USD", "KRW", 1344.0)
                .with_rate("EUR", "USD", 1.08),
        ),
        std::time::Duration::from_secs(3600),
    ))
}

/// Public API stub serving static markets and order books.
pub struct MockPublic {
    pub venue: VenueKind,
    pub markets: MarketSet,
    pub books: HashMap<Market, MarketOrderBook>,
    pub currencies: CurrencyExchangeSet,
    pub healthy: bool,
}

impl MockPublic {
    pub fn new(venue: VenueKind, markets: impl IntoIterator<Item = Market>) -> Self {
        let markets: MarketSet = markets.into_iter().collect();
        let currencies = markets
            .iter()
            .flat_map(|market| [market.base(), market.quote()])
            .map(|cur| CurrencyExchange {
                standard_code: cur,
                venue_code: cur,
                alt_code: cur,
                can_deposit: true,
                can_withdraw: true,
                is_fiat: false,
            })
            .collect();
        MockPublic {
            venue,
            markets,
            books: HashMap::new(),
            currencies,
            healthy: true,
        }
    }

    /// Installs a deep symmetric book around `mid_price` on the market.
    pub fn with_book(mut self, market: Market, mid_price: &str) -> Self {
        let mid: MonetaryAmount = mid_price.into();
        let tick = MonetaryAmount::new(
            1,
            market.quote(),
            mid.nb_decimals() + 1,
        );
        let huge = MonetaryAmount::from_int(1_000_000_000, market.base());
        let ask = mid.checked_add(tick).unwrap();
        let bid = mid.checked_sub(tick).unwrap();
        self.books.insert(
            market,
            MarketOrderBook::new(
                market,
                Utc::now(),
                vec![OrderBookLine {
                    price: ask,
                    amount: huge,
                }],
                vec![OrderBookLine {
                    price: bid,
                    amount: huge,
                }],
            ),
        );
        self
    }

    pub fn set_withdraw_enabled(&mut self, cur: CurrencyCode, enabled: bool) {
        let mut updated: Vec<CurrencyExchange> = self.currencies.iter().copied().collect();
        for currency in &mut updated {
            if currency.standard_code == cur {
                currency.can_withdraw = enabled;
            }
        }
        self.currencies = updated.into_iter().collect();
    }
}

impl VenuePublicApi for MockPublic {
    fn name(&self) -> &'static str {
        self.venue.name()
    }

    fn health_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }

    fn tradable_currencies(&self) -> Result<CurrencyExchangeSet> {
        Ok(self.currencies.clone())
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        Ok(self.markets.clone())
    }

    fn all_prices(&self) -> Result<MarketPriceMap> {
        Ok(self
            .books
            .iter()
            .filter_map(|(market, book)| book.average_price().map(|price| (*market, price)))
            .collect())
    }

    fn all_order_books(&self, _depth: usize) -> Result<MarketOrderBookMap> {
        Ok(self.books.clone())
    }

    fn order_book(&self, market: Market, _depth: usize) -> Result<MarketOrderBook> {
        self.books
            .get(&market)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("no book for {market}")))
    }

    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount> {
        Ok(MonetaryAmount::from_int(1000, market.base()))
    }

    fn last_trades(&self, _market: Market, _nb_trades: usize) -> Result<Vec<PublicTrade>> {
        Ok(Vec::new())
    }

    fn last_price(&self, market: Market) -> Result<MonetaryAmount> {
        self.order_book(market, 1)?
            .average_price()
            .ok_or_else(|| ExchangeError::NotFound(format!("no price for {market}")))
    }

    fn withdrawal_fees(&self) -> Result<WithdrawalFeeMap> {
        Ok(WithdrawalFeeMap::new())
    }
}

/// Private API stub with an in-memory balance; orders fill immediately and
/// entirely at their limit price.
pub struct MockPrivate {
    pub venue: VenueKind,
    pub account: String,
    pub balances: Mutex<BalanceMap>,
    pub placed: Mutex<Vec<(Market, TradeSide, MonetaryAmount)>>,
    pub launch_withdraw_called: AtomicBool,
    pub deposits: Mutex<Vec<Deposit>>,
}

impl MockPrivate {
    pub fn new(venue: VenueKind, account: &str, balances: &[(&str, &str)]) -> Self {
        let mut map = BalanceMap::new();
        for (cur, amount) in balances {
            let cur: CurrencyCode = (*cur).into();
            map.insert(cur, MonetaryAmount::parse_with(amount, cur).unwrap());
        }
        MockPrivate {
            venue,
            account: account.to_string(),
            balances: Mutex::new(map),
            placed: Mutex::new(Vec::new()),
            launch_withdraw_called: AtomicBool::new(false),
            deposits: Mutex::new(Vec::new()),
        }
    }
}

impl VenuePrivateApi for MockPrivate {
    fn venue(&self) -> &'static str {
        self.venue.name()
    }

    fn account_name(&self) -> &str {
        &self.account
    }

    fn validate_api_key(&self) -> Result<bool> {
        Ok(true)
    }

    fn account_balance(&self) -> Result<BalanceMap> {
        Ok(self.balances.lock().clone())
    }

    fn deposit_wallet(&self, cur: CurrencyCode) -> Result<Wallet> {
        Ok(Wallet {
            venue: self.venue.name().into(),
            account_name: self.account.clone(),
            currency: cur,
            address: format!("addr-{}-{cur}", self.account),
            tag: None,
        })
    }

    fn opened_orders(&self, _filter: &OrdersConstraints) -> Result<Vec<Order>> {
        Ok(Vec::new())
    }

    fn closed_orders(&self, _filter: &OrdersConstraints) -> Result<Vec<Order>> {
        Ok(Vec::new())
    }

    fn cancel_orders(&self, _filter: &OrdersConstraints) -> Result<usize> {
        Ok(0)
    }

    fn recent_deposits(&self, filter: &TransferConstraints) -> Result<Vec<Deposit>> {
        Ok(self
            .deposits
            .lock()
            .iter()
            .filter(|deposit| filter.accepts_currency(deposit.amount.currency()))
            .cloned()
            .collect())
    }

    fn recent_withdraws(&self, _filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        Ok(Vec::new())
    }

    fn place_order(
        &self,
        from: MonetaryAmount,
        volume: MonetaryAmount,
        price: MonetaryAmount,
        info: &TradeInfo,
    ) -> Result<PlaceOrderInfo> {
        self.placed
            .lock()
            .push((info.market, info.side, volume));
        let market = info.market;
        let traded = match info.side {
            TradeSide::Sell => TradedAmounts::new(
                volume.with_currency(market.base()),
                volume
                    .to_neutral()
                    .checked_mul(price.with_currency(market.quote()))?,
            ),
            TradeSide::Buy => TradedAmounts::new(
                from.with_currency(market.quote()),
                volume.with_currency(market.base()),
            ),
        };
        // Settle the balance like a real fill would.
        let mut balances = self.balances.lock();
        if let Some(held) = balances.get(&traded.from.currency()).copied() {
            balances.insert(
                traded.from.currency(),
                held.checked_sub(traded.from)
                    .unwrap_or_else(|_| MonetaryAmount::zero(traded.from.currency())),
            );
        }
        let obtained = balances
            .get(&traded.to.currency())
            .copied()
            .unwrap_or_else(|| MonetaryAmount::zero(traded.to.currency()));
        balances.insert(traded.to.currency(), obtained.checked_add(traded.to)?);

        Ok(PlaceOrderInfo {
            order_id: format!("order-{}", self.placed.lock().len()),
            traded,
            is_closed: true,
            is_simulation: info.options.is_simulation,
        })
    }

    fn cancel_order(&self, _order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        Ok(OrderInfo {
            traded: TradedAmounts::zero(
                info.market.base(),
                info.market.quote(),
            ),
            is_closed: true,
        })
    }

    fn query_order_info(&self, _order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        Ok(OrderInfo {
            traded: TradedAmounts::zero(info.market.base(), info.market.quote()),
            is_closed: true,
        })
    }

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo> {
        self.launch_withdraw_called.store(true, Ordering::SeqCst);
        Ok(InitiatedWithdrawInfo {
            withdraw_id: "withdraw-1".into(),
            gross_amount,
            receiving_wallet: destination.clone(),
            initiated_time: Utc::now(),
        })
    }

    fn is_withdraw_successfully_sent(
        &self,
        initiated: &InitiatedWithdrawInfo,
    ) -> Result<SentWithdrawInfo> {
        Ok(SentWithdrawInfo {
            net_amount: Some(initiated.gross_amount),
            fee: Some(MonetaryAmount::zero(initiated.gross_amount.currency())),
            is_sent: true,
        })
    }

    fn query_withdraw_delivery(
        &self,
        initiated: &InitiatedWithdrawInfo,
        sent: &SentWithdrawInfo,
    ) -> Result<Option<MonetaryAmount>> {
        let expected = sent.net_amount.unwrap_or(initiated.gross_amount);
        Ok(self
            .deposits
            .lock()
            .iter()
            .find(|deposit| deposit.amount == expected)
            .map(|deposit| deposit.amount))
    }
}

/// Assembles an orchestrator over mock exchanges.
pub fn orchestrator(exchanges: Vec<Exchange>) -> Orchestrator {
    Orchestrator::new(test_context(), test_fiat_converter(), exchanges, 4).unwrap()
}

pub fn exchange(
    venue: VenueKind,
    public: MockPublic,
    accounts: Vec<MockPrivate>,
) -> Exchange {
    Exchange {
        kind: venue,
        public: Box::new(public),
        accounts: accounts
            .into_iter()
            .map(|account| ExchangeAccount {
                name: account.account.clone(),
                api: Box::new(account),
            })
            .collect(),
    }
}
