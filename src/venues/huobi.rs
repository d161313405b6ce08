use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::Deserialize;
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
use crate::net::flatkv::{url_encode, url_unreserved};
use crate::net::http::{HttpClient, HttpClientConfig, HttpMethod, RequestOptions};
use crate::net::retry::{query_json, RetryPolicy, RetryStatus};
use crate::net::url_picker::BestUrlPicker;
use crate::net::PostData;
use crate::venues::signing::hmac_sha256_base64;

const VENUE: &str = "huobi";

const BASE_URL: &str = "https://api.huobi.pro";
const API_HOST: &str = "api.huobi.pro";

const CURRENCIES_TTL: Duration = Duration::from_secs(3600);
const MARKETS_TTL: Duration = Duration::from_secs(3600);
const TICKER_TTL: Duration = Duration::from_secs(10);
const BOOK_TTL: Duration = Duration::from_secs(2);
const BALANCE_TTL: Duration = Duration::from_secs(5);
const WALLET_TTL: Duration = Duration::from_secs(3600);

// ── Response schemas ────────────────────────────────────────────────

/// v1 endpoints answer `status: "ok" | "error"`, v2 endpoints `code: 200`.
#[derive(Deserialize, Default)]
struct Answer<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    code: i64,
    #[serde(rename = "err-msg", default)]
    err_msg: String,
    data: Option<T>,
    tick: Option<T>,
}

impl<T> Answer<T> {
    fn is_ok(&self) -> bool {
        self.status == "ok" || self.code == 200
    }
}

fn accept_answer<T>(answer: &Answer<T>) -> RetryStatus {
    if !answer.is_ok() && answer.err_msg.contains("too many") {
        RetryStatus::Reject
    } else {
        RetryStatus::Accept
    }
}

fn unwrap_answer<T>(answer: Answer<T>) -> Result<T> {
    if !answer.is_ok() {
        return Err(ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: format!("status {} code {}: {}", answer.status, answer.code, answer.err_msg),
        });
    }
    answer
        .data
        .or(answer.tick)
        .ok_or_else(|| ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: "missing data field".into(),
        })
}

#[derive(Deserialize)]
struct SymbolInfo {
    #[serde(rename = "base-currency")]
    base_currency: String,
    #[serde(rename = "quote-currency")]
    quote_currency: String,
    #[serde(default)]
    state: String,
}

#[derive(Deserialize)]
struct MarketTicker {
    symbol: String,
    #[serde(default)]
    close: f64,
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
}

#[derive(Deserialize, Default)]
struct DepthTick {
    #[serde(default)]
    bids: Vec<(f64, f64)>,
    #[serde(default)]
    asks: Vec<(f64, f64)>,
}

#[derive(Deserialize)]
struct TradeBlock {
    #[serde(default)]
    data: Vec<TradeRow>,
}

#[derive(Deserialize)]
struct TradeRow {
    #[serde(default)]
    price: f64,
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    direction: String,
    #[serde(default)]
    ts: i64,
}

#[derive(Deserialize)]
struct CurrencyInfo {
    currency: String,
    #[serde(default)]
    chains: Vec<ChainInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainInfo {
    #[serde(default)]
    deposit_status: String,
    #[serde(default)]
    withdraw_status: String,
    #[serde(default)]
    transact_fee_withdraw: Option<MonetaryAmount>,
}

#[derive(Deserialize)]
struct AccountInfo {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize, Default)]
struct BalanceData {
    #[serde(default)]
    list: Vec<BalanceRow>,
}

#[derive(Deserialize)]
struct BalanceRow {
    currency: String,
    #[serde(rename = "type")]
    kind: String,
    balance: MonetaryAmount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepositAddressRow {
    address: String,
    #[serde(default)]
    address_tag: String,
}

#[derive(Deserialize, Default)]
struct OrderData {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    symbol: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    price: MonetaryAmount,
    #[serde(default)]
    amount: MonetaryAmount,
    #[serde(rename = "field-amount", default)]
    field_amount: MonetaryAmount,
    #[serde(rename = "field-cash-amount", default)]
    field_cash_amount: MonetaryAmount,
    #[serde(default)]
    state: String,
    #[serde(rename = "created-at", default)]
    created_at: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TransferRow {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    amount: MonetaryAmount,
    #[serde(default)]
    fee: MonetaryAmount,
    #[serde(default)]
    state: String,
    #[serde(default)]
    created_at: i64,
}

// ── Public adapter ──────────────────────────────────────────────────

struct PublicState {
    http: HttpClient,
    currencies: CachedResult<(), (CurrencyExchangeSet, WithdrawalFeeMap)>,
    markets: CachedResult<(), MarketSet>,
    tickers: CachedResult<(), Vec<(Market, MonetaryAmount, MonetaryAmount, MonetaryAmount, MonetaryAmount)>>,
    books: CachedResult<(Market, usize), MarketOrderBook>,
}

pub struct HuobiPublic {
    ctx: Arc<AppContext>,
    vault: Vault<PublicState>,
}

impl HuobiPublic {
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
        Ok(HuobiPublic {
            ctx,
            vault: Vault::new(PublicState {
                http,
                currencies: CachedResult::new(CURRENCIES_TTL),
                markets: CachedResult::new(MARKETS_TTL),
                tickers: CachedResult::new(TICKER_TTL),
                books: CachedResult::new(BOOK_TTL),
            }),
        })
    }

    fn symbol_of(market: Market) -> String {
        market.assets_pair_str("").to_ascii_lowercase()
    }

    fn market_of(&self, symbol: &str, markets: &MarketSet) -> Option<Market> {
        markets
            .iter()
            .find(|market| Self::symbol_of(**market) == symbol)
            .copied()
    }

    /// Ticker rows `(market, last, 24h volume, bid, ask)`.
    #[allow(clippy::type_complexity)]
    fn tickers(
        &self,
    ) -> Result<Vec<(Market, MonetaryAmount, MonetaryAmount, MonetaryAmount, MonetaryAmount)>>
    {
        let markets = self.tradable_markets()?;
        let mut state = self.vault.lock();
        let PublicState { http, tickers, .. } = &mut *state;
        let this = &*self;
        tickers
            .get(|| {
                let answer: Answer<Vec<MarketTicker>> = query_json(
                    http,
                    "/market/tickers",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut list = Vec::new();
                for ticker in unwrap_answer(answer)? {
                    let Some(market) = this.market_of(&ticker.symbol, &markets) else {
                        continue;
                    };
                    let quote = market.quote();
                    let base = market.base();
                    list.push((
                        market,
                        MonetaryAmount::from_f64(ticker.close, quote)?,
                        MonetaryAmount::from_f64(ticker.amount, base)?,
                        MonetaryAmount::from_f64(ticker.bid, quote)?,
                        MonetaryAmount::from_f64(ticker.ask, quote)?,
                    ));
                }
                Ok(list)
            })
            .cloned()
    }

    fn currencies_and_fees(&self) -> Result<(CurrencyExchangeSet, WithdrawalFeeMap)> {
        let mut state = self.vault.lock();
        let PublicState {
            http, currencies, ..
        } = &mut *state;
        let ctx = &self.ctx;
        currencies
            .get(|| {
                let answer: Answer<Vec<CurrencyInfo>> = query_json(
                    http,
                    "/v2/reference/currencies",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut set = CurrencyExchangeSet::new();
                let mut fees = WithdrawalFeeMap::new();
                for currency in unwrap_answer(answer)? {
                    let Ok(standard) = ctx.standardize_currency(&currency.currency) else {
                        continue;
                    };
                    let Ok(venue_code) = CurrencyCode::new(&currency.currency) else {
                        continue;
                    };
                    let can_deposit = currency
                        .chains
                        .iter()
                        .any(|chain| chain.deposit_status == "allowed");
                    let can_withdraw = currency
                        .chains
                        .iter()
                        .any(|chain| chain.withdraw_status == "allowed");
                    if let Some(fee) = currency
                        .chains
                        .first()
                        .and_then(|chain| chain.transact_fee_withdraw)
                    {
                        fees.insert(standard, fee.with_currency(standard));
                    }
                    set.insert(CurrencyExchange {
                        standard_code: standard,
                        venue_code,
                        alt_code: venue_code,
                        can_deposit,
                        can_withdraw,
                        is_fiat: ctx.is_fiat(standard),
                    });
                }
                Ok((set, fees))
            })
            .cloned()
    }
}

impl VenuePublicApi for HuobiPublic {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn health_check(&self) -> Result<bool> {
        let mut state = self.vault.lock();
        let answer: Answer<i64> = query_json(
            &mut state.http,
            "/v1/common/timestamp",
            &RequestOptions::get(),
            RetryPolicy::default(),
            accept_answer,
        )?;
        let healthy = answer.is_ok();
        if let Some(metrics) = self.ctx.metrics() {
            metrics.record_health(VENUE, healthy);
        }
        Ok(healthy)
    }

    fn tradable_currencies(&self) -> Result<CurrencyExchangeSet> {
        Ok(self.currencies_and_fees()?.0)
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        let mut state = self.vault.lock();
        let PublicState { http, markets, .. } = &mut *state;
        let ctx = &self.ctx;
        markets
            .get(|| {
                let answer: Answer<Vec<SymbolInfo>> = query_json(
                    http,
                    "/v1/common/symbols",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut set = MarketSet::new();
                for symbol in unwrap_answer(answer)? {
                    if symbol.state != "online" {
                        continue;
                    }
                    let base = ctx.standardize_currency(&symbol.base_currency)?;
                    let quote = ctx.standardize_currency(&symbol.quote_currency)?;
                    set.insert(Market::new(base, quote));
                }
                Ok(set)
            })
            .cloned()
    }

    fn all_prices(&self) -> Result<MarketPriceMap> {
        Ok(self
            .tickers()?
            .into_iter()
            .map(|(market, last, _, _, _)| (market, last))
            .collect())
    }

    fn all_order_books(&self, _depth: usize) -> Result<MarketOrderBookMap> {
        let now = Utc::now();
        Ok(self
            .tickers()?
            .into_iter()
            .map(|(market, _, _, bid, ask)| {
                let line = |price| OrderBookLine {
                    price,
                    amount: MonetaryAmount::zero(market.base()),
                };
                (
                    market,
                    MarketOrderBook::new(market, now, vec![line(ask)], vec![line(bid)]),
                )
            })
            .collect())
    }

    fn order_book(&self, market: Market, depth: usize) -> Result<MarketOrderBook> {
        let mut state = self.vault.lock();
        let PublicState { http, books, .. } = &mut *state;
        books
            .get_with((market, depth), || {
                let mut params = PostData::new();
                params.append("symbol", Self::symbol_of(market))?;
                params.append("type", "step0")?;
                let answer: Answer<DepthTick> = query_json(
                    http,
                    "/market/depth",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let tick = unwrap_answer(answer)?;
                let to_lines = |levels: Vec<(f64, f64)>| -> Result<Vec<OrderBookLine>> {
                    levels
                        .into_iter()
                        .take(depth)
                        .map(|(price, amount)| {
                            Ok(OrderBookLine {
                                price: MonetaryAmount::from_f64(price, market.quote())?,
                                amount: MonetaryAmount::from_f64(amount, market.base())?,
                            })
                        })
                        .collect()
                };
                Ok(MarketOrderBook::new(
                    market,
                    Utc::now(),
                    to_lines(tick.asks)?,
                    to_lines(tick.bids)?,
                ))
            })
            .cloned()
    }

    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount> {
        self.tickers()?
            .into_iter()
            .find(|(candidate, _, _, _, _)| *candidate == market)
            .map(|(_, _, volume, _, _)| volume)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))
    }

    fn last_trades(&self, market: Market, nb_trades: usize) -> Result<Vec<PublicTrade>> {
        let mut state = self.vault.lock();
        let mut params = PostData::new();
        params.append("symbol", Self::symbol_of(market))?;
        params.append("size", nb_trades.min(2000))?;
        let answer: Answer<Vec<TradeBlock>> = query_json(
            &mut state.http,
            "/market/history/trade",
            &RequestOptions::get().with_post_data(params),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let mut trades = Vec::new();
        for block in unwrap_answer(answer)? {
            for row in block.data {
                trades.push(PublicTrade {
                    side: if row.direction == "buy" {
                        TradeSide::Buy
                    } else {
                        TradeSide::Sell
                    },
                    amount: MonetaryAmount::from_f64(row.amount, market.base())?,
                    price: MonetaryAmount::from_f64(row.price, market.quote())?,
                    time: Utc.timestamp_millis_opt(row.ts).single().unwrap_or_default(),
                });
            }
        }
        trades.sort_by_key(|trade| trade.time);
        trades.truncate(nb_trades);
        Ok(trades)
    }

    fn last_price(&self, market: Market) -> Result<MonetaryAmount> {
        self.tickers()?
            .into_iter()
            .find(|(candidate, _, _, _, _)| *candidate == market)
            .map(|(_, last, _, _, _)| last)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))
    }

    fn withdrawal_fees(&self) -> Result<WithdrawalFeeMap> {
        Ok(self.currencies_and_fees()?.1)
    }

    fn is_withdrawal_fees_source_reliable(&self) -> bool {
        // Fees come straight from the venue's currency reference endpoint.
        true
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
    account_id: CachedResult<(), i64>,
    balance: CachedResult<(), BalanceMap>,
    wallets: CachedResult<CurrencyCode, Wallet>,
}

pub struct HuobiPrivate {
    ctx: Arc<AppContext>,
    account_name: String,
    credentials: ApiCredentials,
    vault: Vault<PrivateState>,
}

impl HuobiPrivate {
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
        Ok(HuobiPrivate {
            ctx,
            account_name,
            credentials,
            vault: Vault::new(PrivateState {
                http,
                account_id: CachedResult::new(Duration::MAX),
                balance: CachedResult::new(BALANCE_TTL),
                wallets: CachedResult::new(WALLET_TTL),
            }),
        })
    }

    /// Signature v2: base64 HMAC-SHA256 of
    /// `METHOD\nhost\npath\nsorted-urlencoded-params`.
    fn signed_query<T>(
        http: &mut HttpClient,
        credentials: &ApiCredentials,
        method: HttpMethod,
        endpoint: &str,
        query_params: PostData,
        json_body: Option<serde_json::Value>,
        policy: RetryPolicy,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut sorted: BTreeMap<String, String> = query_params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        sorted.insert("AccessKeyId".into(), credentials.key.clone());
        sorted.insert("SignatureMethod".into(), "HmacSHA256".into());
        sorted.insert("SignatureVersion".into(), "2".into());
        sorted.insert("Timestamp".into(), timestamp);

        let canonical = sorted
            .iter()
            .map(|(key, value)| format!("{key}={}", url_encode(value, url_unreserved)))
            .collect::<Vec<_>>()
            .join("&");
        let message = format!("{}\n{API_HOST}\n{endpoint}\n{canonical}", method.as_str());
        let signature = hmac_sha256_base64(credentials.secret.as_bytes(), message.as_bytes());

        let mut signed_params = PostData::new();
        for (key, value) in &sorted {
            signed_params.append(key, url_encode(value, url_unreserved))?;
        }
        signed_params.append("Signature", url_encode(&signature, url_unreserved))?;

        let mut opts = RequestOptions {
            method,
            post_data: signed_params,
            json_body: false,
            headers: Vec::new(),
            verbose: false,
        };
        let endpoint = if method == HttpMethod::Post {
            // Signed params travel in the query string; the body is JSON.
            let full = format!("/{}?{}", endpoint.trim_start_matches('/'), opts.post_data.as_str());
            opts.post_data = PostData::new();
            if let Some(body) = json_body {
                let mut body_params = PostData::new();
                if let Some(object) = body.as_object() {
                    for (key, value) in object {
                        let rendered = match value {
                            serde_json::Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        body_params.append(key, rendered)?;
                    }
                }
                opts.post_data = body_params;
                opts.json_body = true;
            }
            full
        } else {
            endpoint.to_string()
        };
        query_json(http, &endpoint, &opts, policy, accept_answer).and_then(unwrap_answer)
    }

    fn account_id(&self) -> Result<i64> {
        let mut state = self.vault.lock();
        let PrivateState {
            http, account_id, ..
        } = &mut *state;
        let credentials = &self.credentials;
        account_id
            .get(|| {
                let accounts: Vec<AccountInfo> = Self::signed_query(
                    http,
                    credentials,
                    HttpMethod::Get,
                    "/v1/account/accounts",
                    PostData::new(),
                    None,
                    RetryPolicy::raising(3),
                )?;
                accounts
                    .into_iter()
                    .find(|account| account.kind == "spot")
                    .map(|account| account.id)
                    .ok_or_else(|| ExchangeError::NotFound("no spot account on huobi".into()))
            })
            .copied()
    }

    fn order_info_from(data: &OrderData, info: &TradeInfo) -> OrderInfo {
        let market = info.market;
        let (from, to) = match info.side {
            TradeSide::Buy => (
                data.field_cash_amount.with_currency(market.quote()),
                data.field_amount.with_currency(market.base()),
            ),
            TradeSide::Sell => (
                data.field_amount.with_currency(market.base()),
                data.field_cash_amount.with_currency(market.quote()),
            ),
        };
        OrderInfo {
            traded: TradedAmounts::new(from, to),
            is_closed: matches!(data.state.as_str(), "filled" | "canceled" | "partial-canceled"),
        }
    }
}

impl VenuePrivateApi for HuobiPrivate {
    fn venue(&self) -> &'static str {
        VENUE
    }

    fn account_name(&self) -> &str {
        &self.account_name
    }

    fn validate_api_key(&self) -> Result<bool> {
        Ok(self.account_id().is_ok())
    }

    fn account_balance(&self) -> Result<BalanceMap> {
        let account_id = self.account_id()?;
        let mut state = self.vault.lock();
        let PrivateState { http, balance, .. } = &mut *state;
        let ctx = &self.ctx;
        let credentials = &self.credentials;
        balance
            .get(|| {
                let endpoint = format!("/v1/account/accounts/{account_id}/balance");
                let data: BalanceData = Self::signed_query(
                    http,
                    credentials,
                    HttpMethod::Get,
                    &endpoint,
                    PostData::new(),
                    None,
                    RetryPolicy::raising(3),
                )?;
                let mut balances = BalanceMap::new();
                for row in data.list {
                    if row.kind != "trade" || row.balance.is_zero() {
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
                params.append("currency", cur.as_str().to_ascii_lowercase())?;
                let rows: Vec<DepositAddressRow> = Self::signed_query(
                    http,
                    credentials,
                    HttpMethod::Get,
                    "/v2/account/deposit/address",
                    params,
                    None,
                    RetryPolicy::raising(3),
                )?;
                let row = rows.into_iter().next().ok_or_else(|| {
                    ExchangeError::NotFound(format!("no deposit address for {cur} on {VENUE}"))
                })?;
                Ok(Wallet {
                    venue: VENUE.into(),
                    account_name: account_name.clone(),
                    currency: cur,
                    address: row.address,
                    tag: (!row.address_tag.is_empty()).then_some(row.address_tag),
                })
            })
            .cloned()
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let account_id = self.account_id()?;
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("account-id", account_id)?;
        let rows: Vec<OrderData> = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            "/v1/order/openOrders",
            params,
            None,
            RetryPolicy::raising(3),
        )?;
        // Symbols are lowercase concatenations; split on the usual quotes.
        let quotes = ["usdt", "usdc", "btc", "eth", "husd", "trx", "ht"];
        let mut orders = Vec::new();
        for row in rows {
            let Some(market) = quotes.iter().find_map(|quote| {
                row.symbol
                    .strip_suffix(quote)
                    .filter(|base| !base.is_empty())
                    .map(|base| Market::new(base, *quote))
            }) else {
                continue;
            };
            let order = Order {
                id: row.id.to_string(),
                market,
                side: if row.kind.starts_with("buy") {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: row.price.with_currency(market.quote()),
                matched_volume: row.field_amount.with_currency(market.base()),
                remaining_volume: row
                    .amount
                    .checked_sub(row.field_amount)?
                    .with_currency(market.base()),
                placed_time: Utc
                    .timestamp_millis_opt(row.created_at)
                    .single()
                    .unwrap_or_default(),
            };
            if filter.accepts(&order) {
                orders.push(order);
            }
        }
        orders.sort_by(|lhs, rhs| lhs.placed_time.cmp(&rhs.placed_time));
        Ok(orders)
    }

    fn closed_orders(&self, _filter: &OrdersConstraints) -> Result<Vec<Order>> {
        // Closed order history needs a symbol and time range on this venue.
        Ok(Vec::new())
    }

    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize> {
        let opened = self.opened_orders(filter)?;
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut nb_cancelled = 0;
        for order in opened {
            let endpoint = format!("/v1/order/orders/{}/submitcancel", order.id);
            let cancelled: Result<serde_json::Value> = Self::signed_query(
                http,
                &self.credentials,
                HttpMethod::Post,
                &endpoint,
                PostData::new(),
                Some(serde_json::json!({})),
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
        let rows = self.transfer_history("deposit", filter)?;
        Ok(rows
            .into_iter()
            .map(|(row, cur)| Deposit {
                id: row.id.to_string(),
                amount: row.amount.with_currency(cur),
                time: Utc
                    .timestamp_millis_opt(row.created_at)
                    .single()
                    .unwrap_or_default(),
                is_settled: row.state == "safe" || row.state == "confirmed",
            })
            .collect())
    }

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        let rows = self.transfer_history("withdraw", filter)?;
        Ok(rows
            .into_iter()
            .map(|(row, cur)| Withdraw {
                id: row.id.to_string(),
                amount: row.amount.with_currency(cur),
                fee: row.fee.with_currency(cur),
                time: Utc
                    .timestamp_millis_opt(row.created_at)
                    .single()
                    .unwrap_or_default(),
                is_sent: row.state == "confirmed",
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
        let account_id = self.account_id()?;
        let market = info.market;
        let body = serde_json::json!({
            "account-id": account_id.to_string(),
            "symbol": HuobiPublic::symbol_of(market),
            "type": match info.side {
                TradeSide::Buy => "buy-limit",
                TradeSide::Sell => "sell-limit",
            },
            "amount": volume.with_currency(CurrencyCode::neutral()).to_string(),
            "price": price.with_currency(CurrencyCode::neutral()).to_string(),
        });
        info!(
            "{VENUE}: place {} order of {from} on {market} at {price}",
            info.side
        );
        let order_id: String = {
            let mut state = self.vault.lock();
            let PrivateState { http, .. } = &mut *state;
            Self::signed_query(
                http,
                &self.credentials,
                HttpMethod::Post,
                "/v1/order/orders/place",
                PostData::new(),
                Some(body),
                RetryPolicy::raising(1),
            )?
        };
        let order_info = self.query_order_info(&order_id, info)?;
        Ok(PlaceOrderInfo {
            order_id,
            traded: order_info.traded,
            is_closed: order_info.is_closed,
            is_simulation: false,
        })
    }

    fn cancel_order(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        {
            let mut state = self.vault.lock();
            let PrivateState { http, .. } = &mut *state;
            let endpoint = format!("/v1/order/orders/{order_id}/submitcancel");
            let _: serde_json::Value = Self::signed_query(
                http,
                &self.credentials,
                HttpMethod::Post,
                &endpoint,
                PostData::new(),
                Some(serde_json::json!({})),
                RetryPolicy::raising(1),
            )?;
        }
        self.query_order_info(order_id, info)
    }

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let endpoint = format!("/v1/order/orders/{order_id}");
        let data: OrderData = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            &endpoint,
            PostData::new(),
            None,
            RetryPolicy::raising(3),
        )?;
        Ok(Self::order_info_from(&data, info))
    }

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut body = serde_json::Map::new();
        body.insert(
            "address".into(),
            serde_json::Value::String(destination.address.clone()),
        );
        body.insert(
            "amount".into(),
            serde_json::Value::String(
                gross_amount.with_currency(CurrencyCode::neutral()).to_string(),
            ),
        );
        body.insert(
            "currency".into(),
            serde_json::Value::String(gross_amount.currency().as_str().to_ascii_lowercase()),
        );
        if let Some(tag) = &destination.tag {
            body.insert("addr-tag".into(), serde_json::Value::String(tag.clone()));
        }
        info!("{VENUE}: withdraw {gross_amount} towards {destination}");
        let withdraw_id: i64 = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Post,
            "/v1/dw/withdraw/api/create",
            PostData::new(),
            Some(serde_json::Value::Object(body)),
            RetryPolicy::raising(1),
        )?;
        Ok(InitiatedWithdrawInfo {
            withdraw_id: withdraw_id.to_string(),
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

impl HuobiPrivate {
    fn transfer_history(
        &self,
        kind: &str,
        filter: &TransferConstraints,
    ) -> Result<Vec<(TransferRow, CurrencyCode)>> {
        let mut state = self.vault.lock();
        let PrivateState { http, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("type", kind)?;
        if let Some(cur) = filter.currency {
            params.append("currency", cur.as_str().to_ascii_lowercase())?;
        }
        let rows: Vec<TransferRow> = Self::signed_query(
            http,
            &self.credentials,
            HttpMethod::Get,
            "/v1/query/deposit-withdraw",
            params,
            None,
            RetryPolicy::raising(3),
        )?;
        let mut entries = Vec::new();
        for row in rows {
            let Ok(cur) = self.ctx.standardize_currency(&row.currency) else {
                continue;
            };
            let time = Utc
                .timestamp_millis_opt(row.created_at)
                .single()
                .unwrap_or_default();
            if !filter.accepts_currency(cur)
                || !filter.accepts_time(time)
                || !filter.accepts_id(&row.id.to_string())
            {
                continue;
            }
            entries.push((row, cur));
        }
        Ok(entries)
    }
}
