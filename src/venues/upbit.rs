use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
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
use crate::net::http::{HttpClient, HttpClientConfig, HttpMethod, RequestOptions};
use crate::net::retry::{query_json, RetryPolicy, RetryStatus};
use crate::net::url_picker::BestUrlPicker;
use crate::net::PostData;
use crate::venues::signing::sha512_hex;

const VENUE: &str = "upbit";

const BASE_URL: &str = "https://api.upbit.com";

const MARKETS_TTL: Duration = Duration::from_secs(3600);
const TICKER_TTL: Duration = Duration::from_secs(10);
const BOOK_TTL: Duration = Duration::from_secs(2);
const BALANCE_TTL: Duration = Duration::from_secs(5);
const WALLET_TTL: Duration = Duration::from_secs(3600);

// ── Response schemas ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    name: serde_json::Value,
    #[serde(default)]
    message: String,
}

/// Upbit errors come wrapped as `{"error": {"name": ..., "message": ...}}`.
#[derive(Deserialize)]
struct ErrorAnswerTagged {
    error: ErrorBody,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Answer<T> {
    Err(ErrorAnswerTagged),
    Ok(T),
}

impl<T: Default> Default for Answer<T> {
    fn default() -> Self {
        Answer::Ok(T::default())
    }
}

fn accept_answer<T>(answer: &Answer<T>) -> RetryStatus {
    match answer {
        Answer::Err(tagged) if tagged.error.message.contains("Too many") => RetryStatus::Reject,
        _ => RetryStatus::Accept,
    }
}

fn unwrap_answer<T>(answer: Answer<T>) -> Result<T> {
    match answer {
        Answer::Ok(value) => Ok(value),
        Answer::Err(tagged) => Err(ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: format!("{}: {}", tagged.error.name, tagged.error.message),
        }),
    }
}

#[derive(Deserialize)]
struct MarketRow {
    /// `KRW-BTC` style: quote first.
    market: String,
}

#[derive(Deserialize)]
struct TickerRow {
    market: String,
    #[serde(default)]
    trade_price: f64,
    #[serde(default)]
    acc_trade_volume_24h: f64,
}

#[derive(Deserialize)]
struct OrderBookRow {
    market: String,
    #[serde(default)]
    orderbook_units: Vec<OrderBookUnit>,
}

#[derive(Deserialize)]
struct OrderBookUnit {
    #[serde(default)]
    ask_price: f64,
    #[serde(default)]
    bid_price: f64,
    #[serde(default)]
    ask_size: f64,
    #[serde(default)]
    bid_size: f64,
}

#[derive(Deserialize)]
struct TradeTickRow {
    #[serde(default)]
    trade_price: f64,
    #[serde(default)]
    trade_volume: f64,
    #[serde(default)]
    ask_bid: String,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Deserialize)]
struct AccountRow {
    currency: String,
    balance: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct CoinAddressRow {
    #[serde(default)]
    deposit_address: Option<String>,
    #[serde(default)]
    secondary_address: Option<String>,
}

#[derive(Deserialize, Default)]
struct OrderRow {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    market: String,
    #[serde(default)]
    price: Option<MonetaryAmount>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    volume: Option<MonetaryAmount>,
    #[serde(default)]
    executed_volume: Option<MonetaryAmount>,
    #[serde(default)]
    remaining_volume: Option<MonetaryAmount>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    trades: Vec<OrderTradeRow>,
}

#[derive(Deserialize)]
struct OrderTradeRow {
    #[serde(default)]
    price: MonetaryAmount,
    #[serde(default)]
    volume: MonetaryAmount,
    #[serde(default)]
    funds: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct TransferRow {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    amount: MonetaryAmount,
    #[serde(default)]
    fee: MonetaryAmount,
    #[serde(default)]
    state: String,
    #[serde(default)]
    done_at: Option<String>,
    #[serde(default)]
    created_at: String,
}

/// Splits `KRW-BTC` (quote first) into a `(base, quote)` market.
fn market_from_name(ctx: &AppContext, name: &str) -> Option<Market> {
    let (quote, base) = name.split_once('-')?;
    let quote = ctx.standardize_currency(quote).ok()?;
    let base = ctx.standardize_currency(base).ok()?;
    Some(Market::new(base, quote))
}

fn name_of(market: Market) -> String {
    format!("{}-{}", market.quote(), market.base())
}

fn parse_rfc3339(raw: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or_default()
}

// ── Public adapter ──────────────────────────────────────────────────

struct PublicState {
    http: HttpClient,
    markets: CachedResult<(), MarketSet>,
    tickers: CachedResult<(), Vec<(Market, MonetaryAmount, MonetaryAmount)>>,
    books: CachedResult<Market, MarketOrderBook>,
}

pub struct UpbitPublic {
    ctx: Arc<AppContext>,
    vault: Vault<PublicState>,
}

impl UpbitPublic {
    pub fn new(ctx: Arc<AppContext>) -> Result<Self> {
        let config = ctx.venue_config(VENUE);
        let http = HttpClient::new(
            BestUrlPicker::single(BASE_URL),
            HttpClientConfig {
                min_interval: config.public_min_interval(),
                proxy: ctx.proxy().map(str::to_string),
                timeout: None,
            },
            ctx.metrics().cloned(),
        )?;
        Ok(UpbitPublic {
            ctx,
            vault: Vault::new(PublicState {
                http,
                markets: CachedResult::new(MARKETS_TTL),
                tickers: CachedResult::new(TICKER_TTL),
                books: CachedResult::new(BOOK_TTL),
            }),
        })
    }

    /// Ticker rows `(market, last price, 24h volume)` for every market.
    fn tickers(&self) -> Result<Vec<(Market, MonetaryAmount, MonetaryAmount)>> {
        let markets = self.tradable_markets()?;
        let names: Vec<String> = markets.iter().map(|market| name_of(*market)).collect();
        let mut state = self.vault.lock();
        let PublicState { http, tickers, .. } = &mut *state;
        let ctx = &self.ctx;
        tickers
            .get(|| {
                let mut params = PostData::new();
                params.append("markets", names.join(","))?;
                let answer: Answer<Vec<TickerRow>> = query_json(
                    http,
                    "/v1/ticker",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut list = Vec::new();
                for row in unwrap_answer(answer)? {
                    let Some(market) = market_from_name(ctx, &row.market) else {
                        continue;
                    };
                    list.push((
                        market,
                        MonetaryAmount::from_f64(row.trade_price, market.quote())?,
                        MonetaryAmount::from_f64(row.acc_trade_volume_24h, market.base())?,
                    ));
                }
                Ok(list)
            })
            .cloned()
    }
}

impl VenuePublicApi for UpbitPublic {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn health_check(&self) -> Result<bool> {
        let healthy = !self.tradable_markets()?.is_empty();
        if let Some(metrics) = self.ctx.metrics() {
            metrics.record_health(VENUE, healthy);
        }
        Ok(healthy)
    }

    fn tradable_currencies(&self) -> Result<CurrencyExchangeSet> {
        // Deposit and withdrawal statuses need credentials on this venue.
        let markets = self.tradable_markets()?;
        let mut set = CurrencyExchangeSet::new();
        for market in &markets {
            for cur in [market.base(), market.quote()] {
                set.insert(CurrencyExchange {
                    standard_code: cur,
                    venue_code: cur,
                    alt_code: cur,
                    can_deposit: true,
                    can_withdraw: true,
                    is_fiat: self.ctx.is_fiat(cur),
                });
            }
        }
        Ok(set)
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        let mut state = self.vault.lock();
        let PublicState { http, markets, .. } = &mut *state;
        let ctx = &self.ctx;
        markets
            .get(|| {
                let answer: Answer<Vec<MarketRow>> = query_json(
                    http,
                    "/v1/market/all",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                Ok(unwrap_answer(answer)?
                    .into_iter()
                    .filter_map(|row| market_from_name(ctx, &row.market))
                    .collect())
            })
            .cloned()
    }

    fn all_prices(&self) -> Result<MarketPriceMap> {
        Ok(self
            .tickers()?
            .into_iter()
            .map(|(market, price, _)| (market, price))
            .collect())
    }

    fn all_order_books(&self, depth: usize) -> Result<MarketOrderBookMap> {
        let markets = self.tradable_markets()?;
        let names: Vec<String> = markets.iter().map(|market| name_of(*market)).collect();
        let mut state = self.vault.lock();
        let mut params = PostData::new();
        params.append("markets", names.join(","))?;
        let answer: Answer<Vec<OrderBookRow>> = query_json(
            &mut state.http,
            "/v1/orderbook",
            &RequestOptions::get().with_post_data(params),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        drop(state);
        let now = Utc::now();
        let mut books = MarketOrderBookMap::new();
        for row in unwrap_answer(answer)? {
            let Some(market) = market_from_name(&self.ctx, &row.market) else {
                continue;
            };
            books.insert(market, book_from_units(market, &row.orderbook_units, depth, now)?);
        }
        Ok(books)
    }

    fn order_book(&self, market: Market, depth: usize) -> Result<MarketOrderBook> {
        let mut state = self.vault.lock();
        let PublicState { http, books, .. } = &mut *state;
        books
            .get_with(market, || {
                let mut params = PostData::new();
                params.append("markets", name_of(market))?;
                let answer: Answer<Vec<OrderBookRow>> = query_json(
                    http,
                    "/v1/orderbook",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let rows = unwrap_answer(answer)?;
                let units = rows
                    .first()
                    .map(|row| row.orderbook_units.as_slice())
                    .unwrap_or_default();
                book_from_units(market, units, depth, Utc::now())
            })
            .cloned()
    }

    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount> {
        self.tickers()?
            .into_iter()
            .find(|(candidate, _, _)| *candidate == market)
            .map(|(_, _, volume)| volume)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))
    }

    fn last_trades(&self, market: Market, nb_trades: usize) -> Result<Vec<PublicTrade>> {
        let mut state = self.vault.lock();
        let mut params = PostData::new();
        params.append("market", name_of(market))?;
        params.append("count", nb_trades.min(500))?;
        let answer: Answer<Vec<TradeTickRow>> = query_json(
            &mut state.http,
            "/v1/trades/ticks",
            &RequestOptions::get().with_post_data(params),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let mut trades = Vec::new();
        for row in unwrap_answer(answer)? {
            trades.push(PublicTrade {
                side: if row.ask_bid == "BID" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                amount: MonetaryAmount::from_f64(row.trade_volume, market.base())?,
                price: MonetaryAmount::from_f64(row.trade_price, market.quote())?,
                time: Utc
                    .timestamp_millis_opt(row.timestamp)
                    .single()
                    .unwrap_or_default(),
            });
        }
        trades.sort_by_key(|trade| trade.time);
        Ok(trades)
    }

    fn last_price(&self, market: Market) -> Result<MonetaryAmount> {
        self.tickers()?
            .into_iter()
            .find(|(candidate, _, _)| *candidate == market)
            .map(|(_, price, _)| price)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))
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

fn book_from_units(
    market: Market,
    units: &[OrderBookUnit],
    depth: usize,
    now: chrono::DateTime<Utc>,
) -> Result<MarketOrderBook> {
    let mut asks = Vec::new();
    let mut bids = Vec::new();
    for unit in units.iter().take(depth) {
        asks.push(OrderBookLine {
            price: MonetaryAmount::from_f64(unit.ask_price, market.quote())?,
            amount: MonetaryAmount::from_f64(unit.ask_size, market.base())?,
        });
        bids.push(OrderBookLine {
            price: MonetaryAmount::from_f64(unit.bid_price, market.quote())?,
            amount: MonetaryAmount::from_f64(unit.bid_size, market.base())?,
        });
    }
    Ok(MarketOrderBook::new(market, now, asks, bids))
}

// ── Private adapter ─────────────────────────────────────────────────

#[derive(Serialize)]
struct JwtClaims {
    access_key: String,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash_alg: Option<String>,
}

struct PrivateState {
    http: HttpClient,
    balance: CachedResult<(), BalanceMap>,
    wallets: CachedResult<CurrencyCode, Wallet>,
}

pub struct UpbitPrivate {
    ctx: Arc<AppContext>,
    account_name: String,
    credentials: ApiCredentials,
    vault: Vault<PrivateState>,
}

impl UpbitPrivate {
    pub fn new(
        ctx: Arc<AppContext>,
        account_name: String,
        credentials: ApiCredentials,
    ) -> Result<Self> {
        let config = ctx.venue_config(VENUE);
        let http = HttpClient::new(
            BestUrlPicker::single(BASE_URL),
            HttpClientConfig {
                min_interval: config.private_min_interval(),
                proxy: ctx.proxy().map(str::to_string),
                timeout: None,
            },
            ctx.metrics().cloned(),
        )?;
        Ok(UpbitPrivate {
            ctx,
            account_name,
            credentials,
            vault: Vault::new(PrivateState {
                http,
                balance: CachedResult::new(BALANCE_TTL),
                wallets: CachedResult::new(WALLET_TTL),
            }),
        })
    }

    /// Bearer JWT carrying the SHA512 hash of the query string.
    fn signed_query<T>(
        http: &mut HttpClient,
        credentials: &ApiCredentials,
        method: HttpMethod,
        endpoint: &str,
        params: PostData,
        policy: RetryPolicy,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let claims = JwtClaims {
            access_key: credentials.key.clone(),
            nonce: uuid::Uuid::new_v4().to_string(),
            query_hash: (!params.is_empty())
                .then(|| sha512_hex(params.to_signing_string().as_bytes())),
            query_hash_alg: (!params.is_empty()).then(|| "SHA512".to_string()),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(credentials.secret.as_bytes()),
        )
        .map_err(|err| ExchangeError::InvalidArgument(format!("cannot sign upbit jwt: {err}")))?;
        let opts = RequestOptions {
            method,
            post_data: params,
            json_body: false,
            headers: vec![("Authorization".into(), format!("Bearer {token}"))],
            verbose: false,
        };
        query_json(http, endpoint, &opts, policy, accept_answer).and_then(unwrap_answer)
    }

    fn order_info_from(row: &OrderRow, info: &TradeInfo) -> Result<OrderInfo> {
        let market = info.market;
        let executed = row
            .executed_volume
            .unwrap_or_default()
            .with_currency(market.base());
        let mut quote_total = MonetaryAmount::zero(market.quote());
        for trade in &row.trades {
            let funds = if trade.funds.is_zero() {
                trade
                    .volume
                    .to_neutral()
                    .checked_mul(trade.price.with_currency(market.quote()))?
            } else {
                trade.funds.with_currency(market.quote())
            };
            quote_total = quote_total.checked_add(funds)?;
        }
        let (from, to) = match info.side {
            TradeSide::Buy => (quote_total, executed),
            TradeSide::Sell => (executed, quote_total),
        };
        Ok(OrderInfo {
            traded: TradedAmounts::new(from, to),
            is_closed: matches!(row.state.as_str(), "done" | "cancel"),
        })
    }
}

impl VenuePrivateApi for UpbitPrivate {
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
        let PrivateState { http, balance, .. } = &mut *state;
        let ctx = &self.ctx;
        let credentials = &self.credentials;
        balance
            .get(|| {
                let rows: Vec<AccountRow> = Self::signed_query(
                    http,
                    credentials,
                    HttpMethod::Get,
                    "/v1/accounts",
                    PostData::new(),
                    RetryPolicy::raising(3),
                )?;
                let mut balances = BalanceMap::new();
                for row in rows {
                    if row.balance.is_zero() {
                        continue;
                    }
                    let Ok(cur) = ctx.standardize_currency(&row.currency) else {
                        continue;
                    };
                    balances.insert(cur, row.balance.with_currency(cur));
                }
                Ok(balances)
            })
            .cloned()
    }

    fn deposit_wallet(&self, cur: CurrencyCode) -> Result<Wallet> {
        let mut state = self.vault.lock();
        let PrivateState { http, wallets, .. } = &mut *state;
        let credentials = &self.credentials;
        let account_name = &self.account_name;
        wallets
            .get_with(cur, || {
                let mut params = PostData::new();
                params.append("currency", cur)?;
                let mut row: CoinAddressRow = Self::signed_query(
                    http,
                    credentials,
                    HttpMethod::Get,
                    "/v1/deposits/coin_address",
                    params.clone(),
                    RetryPolicy::raising(3),
                )
                .unwrap_or_default();
                if row.deposit_address.as_deref().unwrap_or_default().is_empty() {
                    // Address generation is asynchronous on this venue.
                    row = Self::signed_query(
                        http,
                        credentials,
                        HttpMethod::Post,
                        "/v1/deposits/generate_coin_address",
                        params,
                        RetryPolicy::raising(1),
                    )?;
                }
                let address = row
                    .deposit_address
                    .filter(|address| !address.is_empty())
                    .ok_or_else(|| {
                        ExchangeError::NotFound(format!(
                            "no deposit address for {cur} on {VENUE} yet"
                        ))
                    })?;
                Ok(Wallet {
                    venue: VENUE.into(),
                    account_name: account_name.clone(),
                    currency: cur,
                    address,
                    tag: row.secondary_address.filter(|tag| !tag.is_empty()),
                })
            })
            .cloned()
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("state", "wait")?;
        let rows: Vec<OrderRow> = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            "/v1/orders",
            params,
            RetryPolicy::raising(3),
        )?;
        drop(state);
        let mut orders = Vec::new();
        for row in rows {
            let Some(market) = market_from_name(&self.ctx, &row.market) else {
                continue;
            };
            let order = Order {
                id: row.uuid.clone(),
                market,
                side: if row.side == "bid" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: row.price.unwrap_or_default().with_currency(market.quote()),
                matched_volume: row
                    .executed_volume
                    .unwrap_or_default()
                    .with_currency(market.base()),
                remaining_volume: row
                    .remaining_volume
                    .or(row.volume)
                    .unwrap_or_default()
                    .with_currency(market.base()),
                placed_time: parse_rfc3339(&row.created_at),
            };
            if filter.accepts(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|lhs, rhs| lhs.placed_time.cmp(&rhs.placed_time));
        Ok(orders)
    }

    fn closed_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("state", "done")?;
        let rows: Vec<OrderRow> = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            "/v1/orders",
            params,
            RetryPolicy::raising(3),
        )?;
        drop(state);
        let mut orders = Vec::new();
        for row in rows {
            let Some(market) = market_from_name(&self.ctx, &row.market) else {
                continue;
            };
            let order = Order {
                id: row.uuid.clone(),
                market,
                side: if row.side == "bid" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: row.price.unwrap_or_default().with_currency(market.quote()),
                matched_volume: row
                    .executed_volume
                    .unwrap_or_default()
                    .with_currency(market.base()),
                remaining_volume: MonetaryAmount::zero(market.base()),
                placed_time: parse_rfc3339(&row.created_at),
            };
            if filter.accepts(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|lhs, rhs| lhs.placed_time.cmp(&rhs.placed_time));
        Ok(orders)
    }

    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize> {
        let opened = self.opened_orders(filter)?;
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut nb_cancelled = 0;
        for order in opened {
            let mut params = PostData::new();
            params.append("uuid", order.id.as_str())?;
            let cancelled: Result<OrderRow> = Self::signed_query(
                http,
                &self.credentials,
                HttpMethod::Delete,
                "/v1/order",
                params,
                RetryPolicy::raising(1),
            );
            match cancelled {
                Ok(_) => nb_cancelled += 1,
                Err(err) => warn!("could not cancel order {}: {err}", order.id),
            }
        }
        Ok(nb_cancelled)
    }

    fn recent_deposits(&self, filter: &TransferConstraints) -> Result<Vec<Deposit>> {
        let rows = self.transfers("/v1/deposits", filter)?;
        Ok(rows
            .into_iter()
            .map(|(row, cur, time)| Deposit {
                id: row.txid.clone().unwrap_or_else(|| row.uuid.clone()),
                amount: row.amount.with_currency(cur),
                time,
                is_settled: row.state == "ACCEPTED" || row.state == "accepted",
            })
            .collect())
    }

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        let rows = self.transfers("/v1/withdraws", filter)?;
        Ok(rows
            .into_iter()
            .map(|(row, cur, time)| Withdraw {
                id: row.uuid.clone(),
                amount: row.amount.with_currency(cur),
                fee: row.fee.with_currency(cur),
                time,
                is_sent: row.state == "DONE" || row.state == "done",
            })
            .collect())
    }

    fn place_order(
        &self,
        from: MonetaryAmount,
        volume: MonetaryAmount,
        price: MonetaryAmount,
        info: &TradeInfo,
    ) -> Result<PlaceOrderInfo> {
        if info.options.is_simulation {
            if !self.ctx.venue_config(VENUE).place_simulate_real_order {
                return Err(ExchangeError::Capability(format!(
                    "{VENUE} cannot simulate orders; enable place_simulate_real_order to allow real placement"
                )));
            }
            info!("{VENUE}: placing a REAL order for a simulated trade, per venue config");
        }
        let market = info.market;
        let mut params = PostData::new();
        params.append("market", name_of(market))?;
        params.append(
            "side",
            match info.side {
                TradeSide::Buy => "bid",
                TradeSide::Sell => "ask",
            },
        )?;
        params.append("volume", volume.with_currency(CurrencyCode::neutral()))?;
        params.append("price", price.with_currency(CurrencyCode::neutral()))?;
        params.append("ord_type", "limit")?;
        info!(
            "{VENUE}: place {} order of {from} on {market} at {price}",
            info.side
        );
        let row: OrderRow = {
            let mut state = self.vault.lock();
            let PrivateState { http, .. } = &mut *state;
            Self::signed_query(
                http,
                &self.credentials,
                HttpMethod::Post,
                "/v1/orders",
                params,
                RetryPolicy::raising(1),
            )?
        };
        let order_info = self.query_order_info(&row.uuid, info)?;
        Ok(PlaceOrderInfo {
            order_id: row.uuid,
            traded: order_info.traded,
            is_closed: order_info.is_closed,
            is_simulation: false,
        })
    }

    fn cancel_order(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        {
            let mut state = self.vault.lock();
            let PrivateState { http, .. } = &mut *state;
            let mut params = PostData::new();
            params.append("uuid", order_id)?;
            let _: OrderRow = Self::signed_query(
                http,
                &self.credentials,
                HttpMethod::Delete,
                "/v1/order",
                params,
                RetryPolicy::raising(1),
            )?;
        }
        self.query_order_info(order_id, info)
    }

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("uuid", order_id)?;
        let row: OrderRow = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            "/v1/order",
            params,
            RetryPolicy::raising(3),
        )?;
        Self::order_info_from(&row, info)
    }

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("currency", gross_amount.currency())?;
        params.append(
            "amount",
            gross_amount.with_currency(CurrencyCode::neutral()),
        )?;
        params.append("address", destination.address.as_str())?;
        if let Some(tag) = &destination.tag {
            params.append("secondary_address", tag.as_str())?;
        }
        info!("{VENUE}: withdraw {gross_amount} towards {destination}");
        let row: TransferRow = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Post,
            "/v1/withdraws/coin",
            params,
            RetryPolicy::raising(1),
        )?;
        Ok(InitiatedWithdrawInfo {
            withdraw_id: row.uuid,
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
            .map(|withdraw| SentWithdrawInfo {
                net_amount: withdraw.amount.checked_sub(withdraw.fee).ok(),
                fee: Some(withdraw.fee),
                is_sent: withdraw.is_sent,
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

impl UpbitPrivate {
    fn transfers(
        &self,
        endpoint: &str,
        filter: &TransferConstraints,
    ) -> Result<Vec<(TransferRow, CurrencyCode, chrono::DateTime<Utc>)>> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(cur) = filter.currency {
            params.append("currency", cur)?;
        }
        let rows: Vec<TransferRow> = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            endpoint,
            params,
            RetryPolicy::raising(3),
        )?;
        let mut entries = Vec::new();
        for row in rows {
            let Ok(cur) = self.ctx.standardize_currency(&row.currency) else {
                continue;
            };
            let time = row
                .done_at
                .as_deref()
                .map(parse_rfc3339)
                .filter(|time| *time != chrono::DateTime::<Utc>::default())
                .unwrap_or_else(|| parse_rfc3339(&row.created_at));
            let id = row.txid.clone().unwrap_or_else(|| row.uuid.clone());
            if !filter.accepts_currency(cur)
                || !filter.accepts_time(time)
                || !(filter.ids.is_empty()
                    || filter.ids.contains(&id)
                    || filter.ids.contains(&row.uuid))
            {
                continue;
            }
            entries.push((row, cur, time));
        }
        Ok(entries)
    }
}
