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
use crate::net::http::{HttpClient, HttpClientConfig, HttpMethod, RequestOptions};
use crate::net::retry::{query_json, RetryPolicy, RetryStatus};
use crate::net::url_picker::BestUrlPicker;
use crate::net::PostData;
use crate::venues::signing::{hmac_sha256_base64, NonceClock};

const VENUE: &str = "kucoin";

const BASE_URL: &str = "https://api.kucoin.com";

const STATUS_OK: &str = "200000";

const CURRENCIES_TTL: Duration = Duration::from_secs(3600);
const MARKETS_TTL: Duration = Duration::from_secs(3600);
const TICKER_TTL: Duration = Duration::from_secs(10);
const BOOK_TTL: Duration = Duration::from_secs(2);
const BALANCE_TTL: Duration = Duration::from_secs(5);
const WALLET_TTL: Duration = Duration::from_secs(3600);

// ── Response schemas ────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct Answer<T> {
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

fn accept_answer<T>(answer: &Answer<T>) -> RetryStatus {
    // 429 family comes back as a code of its own.
    if answer.code == "429000" || answer.code == "200002" {
        RetryStatus::Reject
    } else {
        RetryStatus::Accept
    }
}

fn unwrap_answer<T>(answer: Answer<T>) -> Result<T> {
    if answer.code != STATUS_OK {
        return Err(ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: format!("code {}: {}", answer.code, answer.msg),
        });
    }
    answer.data.ok_or_else(|| ExchangeError::VenueProtocol {
        venue: VENUE,
        reason: "missing data field".into(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_currency: String,
    quote_currency: String,
    #[serde(default)]
    enable_trading: bool,
}

#[derive(Deserialize, Default)]
struct AllTickersData {
    #[serde(default)]
    ticker: Vec<TickerRow>,
}

#[derive(Deserialize)]
struct TickerRow {
    symbol: String,
    #[serde(default)]
    last: Option<MonetaryAmount>,
    #[serde(default)]
    buy: Option<MonetaryAmount>,
    #[serde(default)]
    sell: Option<MonetaryAmount>,
    #[serde(default)]
    vol: Option<MonetaryAmount>,
}

#[derive(Deserialize, Default)]
struct OrderBookData {
    #[serde(default)]
    asks: Vec<[MonetaryAmount; 2]>,
    #[serde(default)]
    bids: Vec<[MonetaryAmount; 2]>,
}

#[derive(Deserialize)]
struct HistoryRow {
    #[serde(default)]
    price: MonetaryAmount,
    #[serde(default)]
    size: MonetaryAmount,
    #[serde(default)]
    side: String,
    /// Nanoseconds since epoch.
    #[serde(default)]
    time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyRow {
    currency: String,
    #[serde(default)]
    is_deposit_enabled: Option<bool>,
    #[serde(default)]
    is_withdraw_enabled: Option<bool>,
    #[serde(default)]
    withdrawal_min_fee: Option<MonetaryAmount>,
    #[serde(default)]
    chains: Vec<ChainRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainRow {
    #[serde(default)]
    is_deposit_enabled: bool,
    #[serde(default)]
    is_withdraw_enabled: bool,
    #[serde(default)]
    withdrawal_min_fee: Option<MonetaryAmount>,
}

#[derive(Deserialize, Default)]
struct StatusData {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRow {
    currency: String,
    #[serde(rename = "type")]
    kind: String,
    available: MonetaryAmount,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DepositAddressData {
    #[serde(default)]
    address: String,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderData {
    #[serde(default)]
    order_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OrderDetailData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    price: MonetaryAmount,
    #[serde(default)]
    size: MonetaryAmount,
    #[serde(default)]
    deal_funds: MonetaryAmount,
    #[serde(default)]
    deal_size: MonetaryAmount,
    #[serde(default)]
    is_active: bool,
    #[serde(default)]
    created_at: i64,
}

#[derive(Deserialize, Default)]
struct Paginated<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TransferRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    wallet_tx_id: Option<String>,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    amount: MonetaryAmount,
    #[serde(default)]
    fee: MonetaryAmount,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_at: i64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WithdrawalApplyData {
    #[serde(default)]
    withdrawal_id: String,
}

// ── Public adapter ──────────────────────────────────────────────────

struct PublicState {
    http: HttpClient,
    currencies: CachedResult<(), (CurrencyExchangeSet, WithdrawalFeeMap)>,
    markets: CachedResult<(), Vec<(String, Market)>>,
    tickers: CachedResult<(), Vec<(Market, MonetaryAmount, MonetaryAmount, MonetaryAmount, MonetaryAmount)>>,
    books: CachedResult<(Market, usize), MarketOrderBook>,
}

pub struct KucoinPublic {
    ctx: Arc<AppContext>,
    vault: Vault<PublicState>,
}

impl KucoinPublic {
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
        Ok(KucoinPublic {
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
        market.assets_pair_str("-")
    }

    fn symbol_markets(&self) -> Result<Vec<(String, Market)>> {
        let mut state = self.vault.lock();
        let PublicState { http, markets, .. } = &mut *state;
        let ctx = &self.ctx;
        markets
            .get(|| {
                let answer: Answer<Vec<SymbolInfo>> = query_json(
                    http,
                    "/api/v2/symbols",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut list = Vec::new();
                for symbol in unwrap_answer(answer)? {
                    if !symbol.enable_trading {
                        continue;
                    }
                    let base = ctx.standardize_currency(&symbol.base_currency)?;
                    let quote = ctx.standardize_currency(&symbol.quote_currency)?;
                    list.push((symbol.symbol, Market::new(base, quote)));
                }
                Ok(list)
            })
            .cloned()
    }

    /// Ticker rows `(market, last, volume, bid, ask)`.
    #[allow(clippy::type_complexity)]
    fn tickers(
        &self,
    ) -> Result<Vec<(Market, MonetaryAmount, MonetaryAmount, MonetaryAmount, MonetaryAmount)>>
    {
        let symbols = self.symbol_markets()?;
        let mut state = self.vault.lock();
        let PublicState { http, tickers, .. } = &mut *state;
        tickers
            .get(|| {
                let answer: Answer<AllTickersData> = query_json(
                    http,
                    "/api/v1/market/allTickers",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut list = Vec::new();
                for row in unwrap_answer(answer)?.ticker {
                    let Some((_, market)) = symbols
                        .iter()
                        .find(|(symbol, _)| *symbol == row.symbol)
                    else {
                        continue;
                    };
                    let market = *market;
                    let quote = market.quote();
                    let with = |amount: Option<MonetaryAmount>, cur| {
                        amount.unwrap_or_default().with_currency(cur)
                    };
                    list.push((
                        market,
                        with(row.last, quote),
                        with(row.vol, market.base()),
                        with(row.buy, quote),
                        with(row.sell, quote),
                    ));
                }
                Ok(list)
            })
            .cloned()
    }
}

impl VenuePublicApi for KucoinPublic {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn health_check(&self) -> Result<bool> {
        let mut state = self.vault.lock();
        let answer: Answer<StatusData> = query_json(
            &mut state.http,
            "/api/v1/status",
            &RequestOptions::get(),
            RetryPolicy::default(),
            accept_answer,
        )?;
        let healthy = answer
            .data
            .map(|status| status.status == "open")
            .unwrap_or(false);
        if let Some(metrics) = self.ctx.metrics() {
            metrics.record_health(VENUE, healthy);
        }
        Ok(healthy)
    }

    fn tradable_currencies(&self) -> Result<CurrencyExchangeSet> {
        let mut state = self.vault.lock();
        let PublicState {
            http, currencies, ..
        } = &mut *state;
        let ctx = &self.ctx;
        currencies
            .get(|| {
                let answer: Answer<Vec<CurrencyRow>> = query_json(
                    http,
                    "/api/v1/currencies",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut set = CurrencyExchangeSet::new();
                let mut fees = WithdrawalFeeMap::new();
                for row in unwrap_answer(answer)? {
                    let Ok(standard) = ctx.standardize_currency(&row.currency) else {
                        continue;
                    };
                    let Ok(venue_code) = CurrencyCode::new(&row.currency) else {
                        continue;
                    };
                    let can_deposit = row.is_deposit_enabled.unwrap_or_else(|| {
                        row.chains.iter().any(|chain| chain.is_deposit_enabled)
                    });
                    let can_withdraw = row.is_withdraw_enabled.unwrap_or_else(|| {
                        row.chains.iter().any(|chain| chain.is_withdraw_enabled)
                    });
                    let fee = row
                        .withdrawal_min_fee
                        .or_else(|| row.chains.first().and_then(|chain| chain.withdrawal_min_fee));
                    if let Some(fee) = fee {
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
            .map(|(set, _)| set.clone())
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        Ok(self
            .symbol_markets()?
            .into_iter()
            .map(|(_, market)| market)
            .collect())
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
                let endpoint = if depth <= 20 {
                    "/api/v1/market/orderbook/level2_20"
                } else {
                    "/api/v1/market/orderbook/level2_100"
                };
                let mut params = PostData::new();
                params.append("symbol", Self::symbol_of(market))?;
                let answer: Answer<OrderBookData> = query_json(
                    http,
                    endpoint,
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let data = unwrap_answer(answer)?;
                let to_lines = |levels: Vec<[MonetaryAmount; 2]>| {
                    levels
                        .into_iter()
                        .take(depth)
                        .map(|[price, amount]| OrderBookLine {
                            price: price.with_currency(market.quote()),
                            amount: amount.with_currency(market.base()),
                        })
                        .collect()
                };
                Ok(MarketOrderBook::new(
                    market,
                    Utc::now(),
                    to_lines(data.asks),
                    to_lines(data.bids),
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
        let answer: Answer<Vec<HistoryRow>> = query_json(
            &mut state.http,
            "/api/v1/market/histories",
            &RequestOptions::get().with_post_data(params),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let mut trades: Vec<PublicTrade> = unwrap_answer(answer)?
            .into_iter()
            .map(|row| PublicTrade {
                side: if row.side == "buy" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                amount: row.size.with_currency(market.base()),
                price: row.price.with_currency(market.quote()),
                time: Utc.timestamp_nanos(row.time),
            })
            .collect();
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
        let mut state = self.vault.lock();
        let PublicState { currencies, .. } = &mut *state;
        if let Some(((_, fees), _)) = currencies.peek() {
            return Ok(fees.clone());
        }
        drop(state);
        self.tradable_currencies()?;
        let state = self.vault.lock();
        Ok(state
            .currencies
            .peek()
            .map(|((_, fees), _)| fees.clone())
            .unwrap_or_default())
    }

    fn is_withdrawal_fees_source_reliable(&self) -> bool {
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
    nonce: NonceClock,
    balance: CachedResult<(), BalanceMap>,
    wallets: CachedResult<CurrencyCode, Wallet>,
}

pub struct KucoinPrivate {
    ctx: Arc<AppContext>,
    account_name: String,
    credentials: ApiCredentials,
    vault: Vault<PrivateState>,
}

impl KucoinPrivate {
    pub fn new(
        ctx: Arc<AppContext>,
        account_name: String,
        credentials: ApiCredentials,
    ) -> Result<Self> {
        if credentials.passphrase.is_none() {
            return Err(ExchangeError::InvalidArgument(
                "kucoin needs a passphrase along with the api key".into(),
            ));
        }
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
        Ok(KucoinPrivate {
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

    /// `KC-API-SIGN` covers `timestamp + method + endpoint(+query) + body`.
    fn signed_query<T>(
        http: &mut HttpClient,
        nonce: &mut NonceClock,
        credentials: &ApiCredentials,
        method: HttpMethod,
        endpoint: &str,
        query_params: PostData,
        json_body: Option<PostData>,
        policy: RetryPolicy,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let passphrase = credentials.passphrase.clone().unwrap_or_default();
        let timestamp = nonce.next_ms().to_string();

        let mut signed_endpoint = endpoint.to_string();
        if !query_params.is_empty() {
            signed_endpoint.push('?');
            signed_endpoint.push_str(query_params.as_str());
        }
        let body_str = json_body
            .as_ref()
            .map(|body| body.to_json().to_string())
            .unwrap_or_default();
        let message = format!("{timestamp}{}{signed_endpoint}{body_str}", method.as_str());
        let signature = hmac_sha256_base64(credentials.secret.as_bytes(), message.as_bytes());
        let signed_passphrase =
            hmac_sha256_base64(credentials.secret.as_bytes(), passphrase.as_bytes());

        let opts = RequestOptions {
            method,
            json_body: json_body.is_some(),
            post_data: json_body.unwrap_or(query_params),
            headers: vec![
                ("KC-API-KEY".into(), credentials.key.clone()),
                ("KC-API-SIGN".into(), signature),
                ("KC-API-TIMESTAMP".into(), timestamp),
                ("KC-API-PASSPHRASE".into(), signed_passphrase),
                ("KC-API-KEY-VERSION".into(), "2".into()),
            ],
            verbose: false,
        };
        query_json(http, endpoint, &opts, policy, accept_answer).and_then(unwrap_answer)
    }

    fn order_info_from(data: &OrderDetailData, info: &TradeInfo) -> OrderInfo {
        let market = info.market;
        let (from, to) = match info.side {
            TradeSide::Buy => (
                data.deal_funds.with_currency(market.quote()),
                data.deal_size.with_currency(market.base()),
            ),
            TradeSide::Sell => (
                data.deal_size.with_currency(market.base()),
                data.deal_funds.with_currency(market.quote()),
            ),
        };
        OrderInfo {
            traded: TradedAmounts::new(from, to),
            is_closed: !data.is_active,
        }
    }
}

impl VenuePrivateApi for KucoinPrivate {
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
                let rows: Vec<AccountRow> = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    HttpMethod::Get,
                    "/api/v1/accounts",
                    PostData::new(),
                    None,
                    RetryPolicy::raising(3),
                )?;
                let mut balances = BalanceMap::new();
                for row in rows {
                    if row.kind != "trade" || row.available.is_zero() {
                        continue;
                    }
                    let Ok(cur) = ctx.standardize_currency(&row.currency) else {
                        continue;
                    };
                    balances.insert(cur, row.available.with_currency(cur));
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
                params.append("currency", cur)?;
                let mut data: DepositAddressData = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    HttpMethod::Get,
                    "/api/v2/deposit-addresses",
                    params.clone(),
                    None,
                    RetryPolicy::raising(3),
                )
                .unwrap_or_default();
                if data.address.is_empty() {
                    // No address yet: ask the venue to create one.
                    data = Self::signed_query(
                        http,
                        nonce,
                        credentials,
                        HttpMethod::Post,
                        "/api/v1/deposit-addresses",
                        PostData::new(),
                        Some(params),
                        RetryPolicy::raising(1),
                    )?;
                }
                if data.address.is_empty() {
                    return Err(ExchangeError::NotFound(format!(
                        "no deposit address for {cur} on {VENUE}"
                    )));
                }
                Ok(Wallet {
                    venue: VENUE.into(),
                    account_name: account_name.clone(),
                    currency: cur,
                    address: data.address,
                    tag: data.memo.filter(|memo| !memo.is_empty()),
                })
            })
            .cloned()
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("status", "active")?;
        let page: Paginated<OrderDetailData> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            HttpMethod::Get,
            "/api/v1/orders",
            params,
            None,
            RetryPolicy::raising(3),
        )?;
        let mut orders = Vec::new();
        for row in page.items {
            let Some((base, quote)) = row.symbol.split_once('-') else {
                continue;
            };
            let Ok(base) = self.ctx.standardize_currency(base) else {
                continue;
            };
            let Ok(quote) = self.ctx.standardize_currency(quote) else {
                continue;
            };
            let market = Market::new(base, quote);
            let order = Order {
                id: row.id.clone(),
                market,
                side: if row.side == "buy" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: row.price.with_currency(quote),
                matched_volume: row.deal_size.with_currency(base),
                remaining_volume: row.size.checked_sub(row.deal_size)?.with_currency(base),
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

    fn closed_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("status", "done")?;
        let page: Paginated<OrderDetailData> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            HttpMethod::Get,
            "/api/v1/orders",
            params,
            None,
            RetryPolicy::raising(3),
        )?;
        drop(state);
        let mut orders = Vec::new();
        for row in page.items {
            let Some((base, quote)) = row.symbol.split_once('-') else {
                continue;
            };
            let (Ok(base), Ok(quote)) = (
                self.ctx.standardize_currency(base),
                self.ctx.standardize_currency(quote),
            ) else {
                continue;
            };
            let market = Market::new(base, quote);
            let order = Order {
                id: row.id.clone(),
                market,
                side: if row.side == "buy" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: row.price.with_currency(quote),
                matched_volume: row.deal_size.with_currency(base),
                remaining_volume: MonetaryAmount::zero(base),
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

    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize> {
        let opened = self.opened_orders(filter)?;
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut nb_cancelled = 0;
        for order in opened {
            let endpoint = format!("/api/v1/orders/{}", order.id);
            let cancelled: Result<serde_json::Value> = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                HttpMethod::Delete,
                &endpoint,
                PostData::new(),
                None,
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
        let rows = self.transfers("/api/v1/deposits", filter)?;
        Ok(rows
            .into_iter()
            .map(|(row, cur, time)| Deposit {
                id: row
                    .wallet_tx_id
                    .or(row.id)
                    .unwrap_or_default(),
                amount: row.amount.with_currency(cur),
                time,
                is_settled: row.status == "SUCCESS",
            })
            .collect())
    }

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        let rows = self.transfers("/api/v1/withdrawals", filter)?;
        Ok(rows
            .into_iter()
            .map(|(row, cur, time)| Withdraw {
                id: row.id.or(row.wallet_tx_id).unwrap_or_default(),
                amount: row.amount.with_currency(cur),
                fee: row.fee.with_currency(cur),
                time,
                is_sent: row.status == "SUCCESS",
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
        let mut body = PostData::new();
        body.append("clientOid", uuid::Uuid::new_v4().to_string())?;
        body.append(
            "side",
            match info.side {
                TradeSide::Buy => "buy",
                TradeSide::Sell => "sell",
            },
        )?;
        body.append("symbol", KucoinPublic::symbol_of(market))?;
        body.append("type", "limit")?;
        body.append("price", price.with_currency(CurrencyCode::neutral()))?;
        body.append("size", volume.with_currency(CurrencyCode::neutral()))?;
        info!(
            "{VENUE}: place {} order of {from} on {market} at {price}",
            info.side
        );
        let data: PlaceOrderData = {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            Self::signed_query(
                http,
                nonce,
                &self.credentials,
                HttpMethod::Post,
                "/api/v1/orders",
                PostData::new(),
                Some(body),
                RetryPolicy::raising(1),
            )?
        };
        let order_info = self.query_order_info(&data.order_id, info)?;
        Ok(PlaceOrderInfo {
            order_id: data.order_id,
            traded: order_info.traded,
            is_closed: order_info.is_closed,
            is_simulation: false,
        })
    }

    fn cancel_order(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            let endpoint = format!("/api/v1/orders/{order_id}");
            let _: serde_json::Value = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                HttpMethod::Delete,
                &endpoint,
                PostData::new(),
                None,
                RetryPolicy::raising(1),
            )?;
        }
        self.query_order_info(order_id, info)
    }

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let endpoint = format!("/api/v1/orders/{order_id}");
        let data: OrderDetailData = Self::signed_query(
            http,
            nonce,
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
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut body = PostData::new();
        body.append("currency", gross_amount.currency())?;
        body.append("address", destination.address.as_str())?;
        if let Some(tag) = &destination.tag {
            body.append("memo", tag.as_str())?;
        }
        body.append(
            "amount",
            gross_amount.with_currency(CurrencyCode::neutral()),
        )?;
        info!("{VENUE}: withdraw {gross_amount} towards {destination}");
        let data: WithdrawalApplyData = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            HttpMethod::Post,
            "/api/v1/withdrawals",
            PostData::new(),
            Some(body),
            RetryPolicy::raising(1),
        )?;
        Ok(InitiatedWithdrawInfo {
            withdraw_id: data.withdrawal_id,
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

impl KucoinPrivate {
    fn transfers(
        &self,
        endpoint: &str,
        filter: &TransferConstraints,
    ) -> Result<Vec<(TransferRow, CurrencyCode, chrono::DateTime<Utc>)>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(cur) = filter.currency {
            params.append("currency", cur)?;
        }
        let page: Paginated<TransferRow> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            HttpMethod::Get,
            endpoint,
            params,
            None,
            RetryPolicy::raising(3),
        )?;
        let mut entries = Vec::new();
        for row in page.items {
            let Ok(cur) = self.ctx.standardize_currency(&row.currency) else {
                continue;
            };
            let time = Utc
                .timestamp_millis_opt(row.created_at)
                .single()
                .unwrap_or_default();
            let id = row
                .id
                .clone()
                .or_else(|| row.wallet_tx_id.clone())
                .unwrap_or_default();
            if !filter.accepts_currency(cur)
                || !filter.accepts_time(time)
                || !filter.accepts_id(&id)
            {
                continue;
            }
            entries.push((row, cur, time));
        }
        Ok(entries)
    }
}
