use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::private::{BalanceMap, VenuePrivateApi};
use crate::api::public::{
    CurrencyExchangeSet, MarketOrderBookMap, MarketPriceMap, MarketSet, VenuePublicApi,
    WithdrawalFeeMap,
};
use crate::cache::{CachedResult, Vault};
use crate::context::{ApiCredentials, AppContext};
use crate::errors::{ExchangeError, Result};
use crate::model::currency::CurrencyCode;
use crate::model::market::Market;
use crate::model::monetary::MonetaryAmount;
use crate::model::orderbook::{MarketOrderBook, OrderBookLine};
use crate::model::trade::{
    Deposit, Order, OrderInfo, OrdersConstraints, PlaceOrderInfo, PublicTrade, TradeInfo,
    TradeSide, TradedAmounts, TransferConstraints, Withdraw,
};
use crate::model::wallet::{
    CurrencyExchange, InitiatedWithdrawInfo, SentWithdrawInfo, Wallet,
};
use crate::net::http::{HttpClient, HttpClientConfig, RequestOptions};
use crate::net::retry::{query_json, query_json_with, RetryPolicy, RetryStatus};
use crate::net::url_picker::BestUrlPicker;
use crate::net::PostData;
use crate::venues::signing::{hmac_sha256_hex, NonceClock};

const VENUE: &str = "binance";

const BASE_URLS: [&str; 4] = [
    "https://api.binance.com",
    "https://api1.binance.com",
    "https://api2.binance.com",
    "https://api3.binance.com",
];

const MARKETS_TTL: Duration = Duration::from_secs(3600);
const PRICES_TTL: Duration = Duration::from_secs(10);
const BOOK_TTL: Duration = Duration::from_secs(2);
const VOLUME_TTL: Duration = Duration::from_secs(3600);
const TRADES_TTL: Duration = Duration::from_secs(10);
const BALANCE_TTL: Duration = Duration::from_secs(5);
const WALLET_TTL: Duration = Duration::from_secs(3600);

// ── Response schemas ────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum Answer<T> {
    Err { code: i64, msg: String },
    Ok(T),
}

impl<T: Default> Default for Answer<T> {
    fn default() -> Self {
        Answer::Ok(T::default())
    }
}

fn unwrap_answer<T>(answer: Answer<T>) -> Result<T> {
    match answer {
        Answer::Ok(value) => Ok(value),
        Answer::Err { code, msg } => Err(ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: format!("code {code}: {msg}"),
        }),
    }
}

fn accept_answer<T>(answer: &Answer<T>) -> RetryStatus {
    match answer {
        // Rate limits and timestamp drifts are worth retrying.
        Answer::Err { code, .. } if matches!(code, -1003 | -1021) => RetryStatus::Reject,
        _ => RetryStatus::Accept,
    }
}

#[derive(Deserialize, Default)]
struct ExchangeInfo {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PriceTicker {
    symbol: String,
    price: MonetaryAmount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    symbol: String,
    bid_price: MonetaryAmount,
    bid_qty: MonetaryAmount,
    ask_price: MonetaryAmount,
    ask_qty: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct DepthAnswer {
    #[serde(default)]
    bids: Vec<[MonetaryAmount; 2]>,
    #[serde(default)]
    asks: Vec<[MonetaryAmount; 2]>,
}

#[derive(Deserialize, Default)]
struct Day24hTicker {
    #[serde(default)]
    volume: MonetaryAmount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentTrade {
    price: MonetaryAmount,
    qty: MonetaryAmount,
    time: i64,
    is_buyer_maker: bool,
}

#[derive(Deserialize, Default)]
struct AccountAnswer {
    #[serde(default)]
    balances: Vec<AssetBalance>,
}

#[derive(Deserialize)]
struct AssetBalance {
    asset: String,
    free: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct DepositAddressAnswer {
    address: String,
    #[serde(default)]
    tag: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OrderAnswer {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: MonetaryAmount,
    #[serde(default)]
    cummulative_quote_qty: MonetaryAmount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderAnswer {
    order_id: i64,
    symbol: String,
    side: String,
    price: MonetaryAmount,
    orig_qty: MonetaryAmount,
    executed_qty: MonetaryAmount,
    time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepositRecord {
    amount: MonetaryAmount,
    coin: String,
    status: i64,
    insert_time: i64,
    #[serde(default)]
    tx_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawRecord {
    id: String,
    amount: MonetaryAmount,
    #[serde(default)]
    transaction_fee: MonetaryAmount,
    coin: String,
    status: i64,
    #[serde(default)]
    apply_time: String,
}

#[derive(Deserialize, Default)]
struct WithdrawApplyAnswer {
    id: String,
}

/// Markets with their venue symbol index, cached as one consistent unit.
#[derive(Clone, Default, Serialize, Deserialize)]
struct MarketsInfo {
    markets: MarketSet,
    by_symbol: HashMap<String, Market>,
}

fn time_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

// ── Public adapter ──────────────────────────────────────────────────

struct PublicState {
    http: HttpClient,
    markets: CachedResult<(), MarketsInfo>,
    prices: CachedResult<(), MarketPriceMap>,
    books: CachedResult<(Market, usize), MarketOrderBook>,
    volumes: CachedResult<Market, MonetaryAmount>,
    trades: CachedResult<(Market, usize), Vec<PublicTrade>>,
}

pub struct BinancePublic {
    ctx: Arc<AppContext>,
    vault: Vault<PublicState>,
}

impl BinancePublic {
    pub fn new(ctx: Arc<AppContext>) -> Result<Self> {
        let config = ctx.venue_config(VENUE);
        let http = HttpClient::new(
            BestUrlPicker::new(&BASE_URLS),
            HttpClientConfig {
                min_interval: config.public_min_interval(),
                proxy: ctx.proxy().map(str::to_string),
                timeout: None,
            },
            ctx.metrics().cloned(),
        )?;
        Ok(BinancePublic {
            ctx,
            vault: Vault::new(PublicState {
                http,
                markets: CachedResult::new(MARKETS_TTL),
                prices: CachedResult::new(PRICES_TTL),
                books: CachedResult::new(BOOK_TTL),
                volumes: CachedResult::new(VOLUME_TTL),
                trades: CachedResult::new(TRADES_TTL),
            }),
        })
    }

    fn markets_info(&self) -> Result<MarketsInfo> {
        let mut state = self.vault.lock();
        let PublicState { http, markets, .. } = &mut *state;
        let ctx = &self.ctx;
        markets
            .get(|| {
                let answer: Answer<ExchangeInfo> = query_json(
                    http,
                    "/api/v3/exchangeInfo",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut info = MarketsInfo::default();
                for symbol in unwrap_answer(answer)?.symbols {
                    if symbol.status != "TRADING" {
                        continue;
                    }
                    let base = ctx.standardize_currency(&symbol.base_asset)?;
                    let quote = ctx.standardize_currency(&symbol.quote_asset)?;
                    let market = Market::new(base, quote);
                    info.markets.insert(market);
                    info.by_symbol.insert(symbol.symbol, market);
                }
                Ok(info)
            })
            .cloned()
    }

    fn symbol_of(market: Market) -> String {
        market.assets_pair_str("")
    }
}

impl VenuePublicApi for BinancePublic {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn health_check(&self) -> Result<bool> {
        let mut state = self.vault.lock();
        let body = state.http.query("/api/v3/ping", &RequestOptions::get())?;
        let healthy = body.trim() == "{}";
        if let Some(metrics) = self.ctx.metrics() {
            metrics.record_health(VENUE, healthy);
        }
        Ok(healthy)
    }

    fn tradable_currencies(&self) -> Result<CurrencyExchangeSet> {
        // No keyless currency endpoint: derive from markets, statuses
        // optimistic.
        let info = self.markets_info()?;
        let mut currencies = CurrencyExchangeSet::new();
        for market in &info.markets {
            for cur in [market.base(), market.quote()] {
                currencies.insert(CurrencyExchange {
                    standard_code: cur,
                    venue_code: cur,
                    alt_code: cur,
                    can_deposit: true,
                    can_withdraw: true,
                    is_fiat: self.ctx.is_fiat(cur),
                });
            }
        }
        Ok(currencies)
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        Ok(self.markets_info()?.markets)
    }

    fn all_prices(&self) -> Result<MarketPriceMap> {
        let by_symbol = self.markets_info()?.by_symbol;
        let mut state = self.vault.lock();
        let PublicState { http, prices, .. } = &mut *state;
        prices
            .get(|| {
                let answer: Answer<Vec<PriceTicker>> = query_json(
                    http,
                    "/api/v3/ticker/price",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut map = MarketPriceMap::new();
                for ticker in unwrap_answer(answer)? {
                    if let Some(market) = by_symbol.get(&ticker.symbol) {
                        map.insert(*market, ticker.price.with_currency(market.quote()));
                    }
                }
                Ok(map)
            })
            .cloned()
    }

    fn all_order_books(&self, _depth: usize) -> Result<MarketOrderBookMap> {
        // Book tickers give a depth-1 book for every market in one query.
        let by_symbol = self.markets_info()?.by_symbol;
        let mut state = self.vault.lock();
        let answer: Answer<Vec<BookTicker>> = query_json(
            &mut state.http,
            "/api/v3/ticker/bookTicker",
            &RequestOptions::get(),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let now = Utc::now();
        let mut books = MarketOrderBookMap::new();
        for ticker in unwrap_answer(answer)? {
            let Some(market) = by_symbol.get(&ticker.symbol) else {
                continue;
            };
            let ask = OrderBookLine {
                price: ticker.ask_price.with_currency(market.quote()),
                amount: ticker.ask_qty.with_currency(market.base()),
            };
            let bid = OrderBookLine {
                price: ticker.bid_price.with_currency(market.quote()),
                amount: ticker.bid_qty.with_currency(market.base()),
            };
            books.insert(
                *market,
                MarketOrderBook::new(*market, now, vec![ask], vec![bid]),
            );
        }
        Ok(books)
    }

    fn order_book(&self, market: Market, depth: usize) -> Result<MarketOrderBook> {
        let mut state = self.vault.lock();
        let PublicState { http, books, .. } = &mut *state;
        books
            .get_with((market, depth), || {
                let mut params = PostData::new();
                params.append("symbol", Self::symbol_of(market))?;
                params.append("limit", depth)?;
                let answer: Answer<DepthAnswer> = query_json(
                    http,
                    "/api/v3/depth",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let depth_answer = unwrap_answer(answer)?;
                let to_lines = |levels: Vec<[MonetaryAmount; 2]>| {
                    levels
                        .into_iter()
                        .map(|[price, amount]| OrderBookLine {
                            price: price.with_currency(market.quote()),
                            amount: amount.with_currency(market.base()),
                        })
                        .collect()
                };
                Ok(MarketOrderBook::new(
                    market,
                    Utc::now(),
                    to_lines(depth_answer.asks),
                    to_lines(depth_answer.bids),
                ))
            })
            .cloned()
    }

    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount> {
        let mut state = self.vault.lock();
        let PublicState { http, volumes, .. } = &mut *state;
        volumes
            .get_with(market, || {
                let mut params = PostData::new();
                params.append("symbol", Self::symbol_of(market))?;
                let answer: Answer<Day24hTicker> = query_json(
                    http,
                    "/api/v3/ticker/24hr",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                Ok(unwrap_answer(answer)?.volume.with_currency(market.base()))
            })
            .copied()
    }

    fn last_trades(&self, market: Market, nb_trades: usize) -> Result<Vec<PublicTrade>> {
        let mut state = self.vault.lock();
        let PublicState { http, trades, .. } = &mut *state;
        trades
            .get_with((market, nb_trades), || {
                let mut params = PostData::new();
                params.append("symbol", Self::symbol_of(market))?;
                params.append("limit", nb_trades)?;
                let answer: Answer<Vec<RecentTrade>> = query_json(
                    http,
                    "/api/v3/trades",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut list: Vec<PublicTrade> = unwrap_answer(answer)?
                    .into_iter()
                    .map(|trade| PublicTrade {
                        // The aggressor sold when the buyer was the maker.
                        side: if trade.is_buyer_maker {
                            TradeSide::Sell
                        } else {
                            TradeSide::Buy
                        },
                        amount: trade.qty.with_currency(market.base()),
                        price: trade.price.with_currency(market.quote()),
                        time: time_from_ms(trade.time),
                    })
                    .collect();
                list.sort_by_key(|trade| trade.time);
                Ok(list)
            })
            .cloned()
    }

    fn last_price(&self, market: Market) -> Result<MonetaryAmount> {
        let mut state = self.vault.lock();
        let mut params = PostData::new();
        params.append("symbol", Self::symbol_of(market))?;
        let answer: Answer<PriceTicker> = query_json(
            &mut state.http,
            "/api/v3/ticker/price",
            &RequestOptions::get().with_post_data(params),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        Ok(unwrap_answer(answer)?.price.with_currency(market.quote()))
    }

    fn withdrawal_fees(&self) -> Result<WithdrawalFeeMap> {
        Ok(self.ctx.load_static_withdrawal_fees(VENUE))
    }

    fn dump_caches(&self) -> serde_json::Value {
        let state = self.vault.lock();
        serde_json::json!({ "markets": state.markets.dump() })
    }

    fn load_caches(&self, snapshot: &serde_json::Value) {
        let mut state = self.vault.lock();
        state.markets.load(&snapshot["markets"]);
    }
}

// ── Private adapter ─────────────────────────────────────────────────

struct PrivateState {
    http: HttpClient,
    nonce: NonceClock,
    balance: CachedResult<(), BalanceMap>,
    wallets: CachedResult<CurrencyCode, Wallet>,
}

pub struct BinancePrivate {
    ctx: Arc<AppContext>,
    account_name: String,
    credentials: ApiCredentials,
    vault: Vault<PrivateState>,
}

impl BinancePrivate {
    pub fn new(
        ctx: Arc<AppContext>,
        account_name: String,
        credentials: ApiCredentials,
    ) -> Result<Self> {
        let config = ctx.venue_config(VENUE);
        let http = HttpClient::new(
            BestUrlPicker::new(&BASE_URLS),
            HttpClientConfig {
                min_interval: config.private_min_interval(),
                proxy: ctx.proxy().map(str::to_string),
                timeout: None,
            },
            ctx.metrics().cloned(),
        )?;
        Ok(BinancePrivate {
            ctx,
            account_name,
            credentials,
            vault: Vault::new(PrivateState {
                http,
                nonce: NonceClock::default(),
                balance: CachedResult::new(BALANCE_TTL),
                wallets: CachedResult::new(WALLET_TTL),
            }),
        })
    }

    /// Signed query: the signature is an HMAC-SHA256 of the canonical
    /// parameter string, refreshed with the timestamp on every attempt.
    fn signed_query<T>(
        http: &mut HttpClient,
        nonce: &mut NonceClock,
        credentials: &ApiCredentials,
        mut opts: RequestOptions,
        endpoint: &str,
        policy: RetryPolicy,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        opts.headers
            .push(("X-MBX-APIKEY".into(), credentials.key.clone()));
        let secret = credentials.secret.clone();
        query_json_with(
            http,
            endpoint,
            &mut opts,
            policy,
            accept_answer,
            move |opts| {
                opts.post_data.erase("signature");
                let _ = opts.post_data.set("recvWindow", 5000);
                let _ = opts.post_data.set("timestamp", nonce.next_ms());
                let signature =
                    hmac_sha256_hex(secret.as_bytes(), opts.post_data.to_signing_string().as_bytes());
                let _ = opts.post_data.append("signature", signature);
            },
        )
        .and_then(unwrap_answer)
    }

    fn market_filter_of(filter: &OrdersConstraints) -> Option<Market> {
        match (filter.cur1, filter.cur2) {
            (Some(cur1), Some(cur2)) => Some(Market::new(cur1, cur2)),
            _ => None,
        }
    }

    fn order_from_answer(&self, answer: OpenOrderAnswer) -> Result<Order> {
        // Venue symbols are concatenated; recover the market through the
        // standard quote currencies Binance uses.
        let market = ["USDT", "BTC", "EUR", "USDC", "BNB", "ETH", "TRY", "KRW"]
            .iter()
            .find_map(|quote| {
                answer
                    .symbol
                    .strip_suffix(quote)
                    .map(|base| Market::new(base, *quote))
            })
            .ok_or_else(|| {
                ExchangeError::Parse(format!("cannot split symbol {}", answer.symbol))
            })?;
        Ok(Order {
            id: answer.order_id.to_string(),
            market,
            side: if answer.side == "BUY" {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
            price: answer.price.with_currency(market.quote()),
            matched_volume: answer.executed_qty.with_currency(market.base()),
            remaining_volume: answer
                .orig_qty
                .checked_sub(answer.executed_qty)?
                .with_currency(market.base()),
            placed_time: time_from_ms(answer.time),
        })
    }

    fn order_info_from(&self, answer: OrderAnswer, info: &TradeInfo) -> OrderInfo {
        let market = info.market;
        let (from, to) = match info.side {
            TradeSide::Buy => (
                answer.cummulative_quote_qty.with_currency(market.quote()),
                answer.executed_qty.with_currency(market.base()),
            ),
            TradeSide::Sell => (
                answer.executed_qty.with_currency(market.base()),
                answer.cummulative_quote_qty.with_currency(market.quote()),
            ),
        };
        OrderInfo {
            traded: TradedAmounts::new(from, to),
            is_closed: matches!(
                answer.status.as_str(),
                "FILLED" | "CANCELED" | "REJECTED" | "EXPIRED"
            ),
        }
    }
}

impl VenuePrivateApi for BinancePrivate {
    fn venue(&self) -> &'static str {
        VENUE
    }

    fn account_name(&self) -> &str {
        &self.account_name
    }

    fn validate_api_key(&self) -> Result<bool> {
        Ok(self.account_balance().is_ok())
    }

    fn account_balance(&self) -> Result<BalanceMap> {
        let mut state = self.vault.lock();
        let PrivateState {
            http,
            nonce,
            balance,
            ..
        } = &mut *state;
        let ctx = &self.ctx;
        let credentials = &self.credentials;
        balance
            .get(|| {
                let answer: AccountAnswer = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    RequestOptions::get(),
                    "/api/v3/account",
                    RetryPolicy::raising(3),
                )?;
                let mut balances = BalanceMap::new();
                for asset in answer.balances {
                    if asset.free.is_zero() {
                        continue;
                    }
                    let cur = ctx.standardize_currency(&asset.asset)?;
                    balances.insert(cur, asset.free.with_currency(cur));
                }
                Ok(balances)
            })
            .cloned()
    }

    fn deposit_wallet(&self, cur: CurrencyCode) -> Result<Wallet> {
        let mut state = self.vault.lock();
        let PrivateState {
            http,
            nonce,
            wallets,
            ..
        } = &mut *state;
        let credentials = &self.credentials;
        let account_name = &self.account_name;
        wallets
            .get_with(cur, || {
                let mut params = PostData::new();
                params.append("coin", cur)?;
                let answer: DepositAddressAnswer = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    RequestOptions::get().with_post_data(params),
                    "/sapi/v1/capital/deposit/address",
                    RetryPolicy::raising(3),
                )?;
                Ok(Wallet {
                    venue: VENUE.into(),
                    account_name: account_name.clone(),
                    currency: cur,
                    address: answer.address,
                    tag: (!answer.tag.is_empty()).then_some(answer.tag),
                })
            })
            .cloned()
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(market) = Self::market_filter_of(filter) {
            params.append("symbol", market.assets_pair_str(""))?;
        }
        let answers: Vec<OpenOrderAnswer> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::get().with_post_data(params),
            "/api/v3/openOrders",
            RetryPolicy::raising(3),
        )?;
        let mut orders = Vec::new();
        for answer in answers {
            let order = self.order_from_answer(answer)?;
            if filter.accepts(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|lhs, rhs| lhs.placed_time.cmp(&rhs.placed_time));
        Ok(orders)
    }

    fn closed_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let Some(market) = Self::market_filter_of(filter) else {
            warn!("binance needs a market filter to list closed orders");
            return Ok(Vec::new());
        };
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("symbol", market.assets_pair_str(""))?;
        let answers: Vec<OpenOrderAnswer> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::get().with_post_data(params),
            "/api/v3/allOrders",
            RetryPolicy::raising(3),
        )?;
        let mut orders = Vec::new();
        for answer in answers {
            let order = self.order_from_answer(answer)?;
            if order.remaining_volume.is_zero() && filter.accepts(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|lhs, rhs| lhs.placed_time.cmp(&rhs.placed_time));
        Ok(orders)
    }

    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize> {
        let opened = self.opened_orders(filter)?;
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut nb_cancelled = 0;
        for order in opened {
            let mut params = PostData::new();
            params.append("symbol", order.market.assets_pair_str(""))?;
            params.append("orderId", order.id.as_str())?;
            let answer: Result<OrderAnswer> = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                RequestOptions::delete().with_post_data(params),
                "/api/v3/order",
                RetryPolicy::raising(1),
            );
            match answer {
                Ok(_) => nb_cancelled += 1,
                Err(err) => warn!("could not cancel order {}: {err}", order.id),
            }
        }
        Ok(nb_cancelled)
    }

    fn recent_deposits(&self, filter: &TransferConstraints) -> Result<Vec<Deposit>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(cur) = filter.currency {
            params.append("coin", cur)?;
        }
        let records: Vec<DepositRecord> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::get().with_post_data(params),
            "/sapi/v1/capital/deposit/hisrec",
            RetryPolicy::raising(3),
        )?;
        let mut deposits = Vec::new();
        for record in records {
            let cur = self.ctx.standardize_currency(&record.coin)?;
            let time = time_from_ms(record.insert_time);
            if !filter.accepts_currency(cur) || !filter.accepts_time(time) {
                continue;
            }
            deposits.push(Deposit {
                id: record.tx_id,
                amount: record.amount.with_currency(cur),
                time,
                is_settled: record.status == 1,
            });
        }
        Ok(deposits)
    }

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(cur) = filter.currency {
            params.append("coin", cur)?;
        }
        let records: Vec<WithdrawRecord> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::get().with_post_data(params),
            "/sapi/v1/capital/withdraw/history",
            RetryPolicy::raising(3),
        )?;
        let mut withdraws = Vec::new();
        for record in records {
            let cur = self.ctx.standardize_currency(&record.coin)?;
            let time = record
                .apply_time
                .parse::<DateTime<Utc>>()
                .unwrap_or_default();
            if !filter.accepts_currency(cur)
                || !filter.accepts_time(time)
                || !filter.accepts_id(&record.id)
            {
                continue;
            }
            withdraws.push(Withdraw {
                id: record.id,
                amount: record.amount.with_currency(cur),
                fee: record.transaction_fee.with_currency(cur),
                time,
                is_sent: record.status == 6,
            });
        }
        Ok(withdraws)
    }

    fn place_order(
        &self,
        from: MonetaryAmount,
        volume: MonetaryAmount,
        price: MonetaryAmount,
        info: &TradeInfo,
    ) -> Result<PlaceOrderInfo> {
        let market = info.market;
        let mut params = PostData::new();
        params.append("symbol", market.assets_pair_str(""))?;
        params.append(
            "side",
            match info.side {
                TradeSide::Buy => "BUY",
                TradeSide::Sell => "SELL",
            },
        )?;
        params.append("type", "LIMIT")?;
        params.append("timeInForce", "GTC")?;
        params.append("quantity", volume.with_currency(CurrencyCode::neutral()))?;
        params.append("price", price.with_currency(CurrencyCode::neutral()))?;

        // Binance simulates natively on a dedicated endpoint.
        let endpoint = if info.options.is_simulation {
            "/api/v3/order/test"
        } else {
            "/api/v3/order"
        };
        info!(
            "{VENUE}: place {} order of {from} on {market} at {price}{}",
            info.side,
            if info.options.is_simulation { " (test)" } else { "" },
        );

        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        if info.options.is_simulation {
            let _: serde_json::Value = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                RequestOptions::post().with_post_data(params),
                endpoint,
                RetryPolicy::raising(1),
            )?;
            return Ok(PlaceOrderInfo {
                order_id: "simulated".into(),
                traded: TradedAmounts::zero(from.currency(), info.market.opposite_of(from.currency()).unwrap_or_default()),
                is_closed: true,
                is_simulation: true,
            });
        }
        let answer: OrderAnswer = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::post().with_post_data(params),
            endpoint,
            RetryPolicy::raising(1),
        )?;
        let order_info = self.order_info_from(
            OrderAnswer {
                order_id: answer.order_id,
                status: answer.status.clone(),
                executed_qty: answer.executed_qty,
                cummulative_quote_qty: answer.cummulative_quote_qty,
            },
            info,
        );
        Ok(PlaceOrderInfo {
            order_id: answer.order_id.to_string(),
            traded: order_info.traded,
            is_closed: order_info.is_closed,
            is_simulation: false,
        })
    }

    fn cancel_order(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            let mut params = PostData::new();
            params.append("symbol", info.market.assets_pair_str(""))?;
            params.append("orderId", order_id)?;
            let _: OrderAnswer = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                RequestOptions::delete().with_post_data(params),
                "/api/v3/order",
                RetryPolicy::raising(1),
            )?;
        }
        self.query_order_info(order_id, info)
    }

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("symbol", info.market.assets_pair_str(""))?;
        params.append("orderId", order_id)?;
        let answer: OrderAnswer = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::get().with_post_data(params),
            "/api/v3/order",
            RetryPolicy::raising(3),
        )?;
        Ok(self.order_info_from(answer, info))
    }

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("coin", gross_amount.currency())?;
        params.append("address", destination.address.as_str())?;
        if let Some(tag) = &destination.tag {
            params.append("addressTag", tag.as_str())?;
        }
        params.append(
            "amount",
            gross_amount.with_currency(CurrencyCode::neutral()),
        )?;
        info!("{VENUE}: withdraw {gross_amount} towards {destination}");
        let answer: WithdrawApplyAnswer = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            RequestOptions::post().with_post_data(params),
            "/sapi/v1/capital/withdraw/apply",
            RetryPolicy::raising(1),
        )?;
        Ok(InitiatedWithdrawInfo {
            withdraw_id: answer.id,
            gross_amount,
            receiving_wallet: destination.clone(),
            initiated_time: Utc::now(),
        })
    }

    fn is_withdraw_successfully_sent(
        &self,
        initiated: &InitiatedWithdrawInfo,
    ) -> Result<SentWithdrawInfo> {
        let mut filter = TransferConstraints::with_currency(initiated.gross_amount.currency());
        filter.ids.insert(initiated.withdraw_id.clone());
        let withdraws = self.recent_withdraws(&filter)?;
        Ok(withdraws
            .into_iter()
            .find(|withdraw| withdraw.id == initiated.withdraw_id)
            .map(|withdraw| {
                let net = withdraw.amount.checked_sub(withdraw.fee).ok();
                SentWithdrawInfo {
                    net_amount: net,
                    fee: Some(withdraw.fee),
                    is_sent: withdraw.is_sent,
                }
            })
            .unwrap_or_default())
    }

    fn query_withdraw_delivery(
        &self,
        initiated: &InitiatedWithdrawInfo,
        sent: &SentWithdrawInfo,
    ) -> Result<Option<MonetaryAmount>> {
        let cur = initiated.gross_amount.currency();
        let deposits = self.recent_deposits(&TransferConstraints::with_currency(cur))?;
        Ok(deposits
            .into_iter()
            .filter(|deposit| deposit.is_settled && deposit.time >= initiated.initiated_time)
            .find(|deposit| match sent.net_amount {
                Some(net) => deposit.amount == net,
                None => deposit.amount <= initiated.gross_amount,
            })
            .map(|deposit| deposit.amount))
    }

    fn dump_caches(&self) -> serde_json::Value {
        let state = self.vault.lock();
        serde_json::json!({ "wallets": state.wallets.dump() })
    }

    fn load_caches(&self, snapshot: &serde_json::Value) {
        let mut state = self.vault.lock();
        state.wallets.load(&snapshot["wallets"]);
    }
}
