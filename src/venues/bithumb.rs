use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
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
use crate::net::flatkv::url_unreserved;
use crate::net::http::{HttpClient, HttpClientConfig, RequestOptions};
use crate::net::retry::{query_json, query_json_with, RetryPolicy, RetryStatus};
use crate::net::url_picker::BestUrlPicker;
use crate::net::PostData;
use crate::venues::signing::{hmac_sha512_hex, NonceClock};

const VENUE: &str = "bithumb";

const BASE_URL: &str = "https://api.bithumb.com";

/// Success status of every Bithumb payload.
const STATUS_OK: &str = "0000";
/// Statuses worth a retry (rate limit and internal errors).
const STATUS_RETRYABLE: [&str; 2] = ["5400", "5500"];

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
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

fn accept_answer<T>(answer: &Answer<T>) -> RetryStatus {
    if STATUS_RETRYABLE.contains(&answer.status.as_str()) {
        RetryStatus::Reject
    } else {
        RetryStatus::Accept
    }
}

fn unwrap_answer<T>(answer: Answer<T>) -> Result<T> {
    if answer.status != STATUS_OK {
        return Err(ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: format!("status {}: {}", answer.status, answer.message),
        });
    }
    answer.data.ok_or_else(|| ExchangeError::VenueProtocol {
        venue: VENUE,
        reason: "missing data field".into(),
    })
}

#[derive(Deserialize, Default)]
struct TickerData {
    #[serde(default)]
    closing_price: MonetaryAmount,
    #[serde(rename = "units_traded_24H", default)]
    units_traded_24h: Option<MonetaryAmount>,
}

#[derive(Deserialize)]
struct OrderBookLevel {
    price: MonetaryAmount,
    quantity: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct OrderBookData {
    #[serde(default)]
    bids: Vec<OrderBookLevel>,
    #[serde(default)]
    asks: Vec<OrderBookLevel>,
}

#[derive(Deserialize)]
struct TransactionData {
    transaction_date: String,
    #[serde(rename = "type")]
    side: String,
    units_traded: MonetaryAmount,
    price: MonetaryAmount,
}

#[derive(Deserialize)]
struct AssetStatus {
    #[serde(default)]
    deposit_status: i64,
    #[serde(default)]
    withdrawal_status: i64,
}

#[derive(Deserialize, Default)]
struct WalletAddressData {
    #[serde(default)]
    wallet_address: String,
    #[serde(default)]
    currency: String,
}

#[derive(Deserialize, Default)]
struct PlacedOrderAnswer {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    order_id: String,
}

#[derive(Deserialize)]
struct OpenOrderData {
    order_id: String,
    order_currency: String,
    payment_currency: String,
    order_date: i64,
    #[serde(rename = "type")]
    side: String,
    units: MonetaryAmount,
    units_remaining: MonetaryAmount,
    price: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct OrderDetailData {
    #[serde(default)]
    order_status: String,
    #[serde(default)]
    contract: Vec<ContractData>,
}

#[derive(Deserialize)]
struct ContractData {
    units: MonetaryAmount,
    price: MonetaryAmount,
}

// ── Public adapter ──────────────────────────────────────────────────

struct PublicState {
    http: HttpClient,
    currencies: CachedResult<(), CurrencyExchangeSet>,
    tickers: CachedResult<CurrencyCode, Vec<(Market, MonetaryAmount, MonetaryAmount)>>,
    books: CachedResult<Market, MarketOrderBook>,
}

pub struct BithumbPublic {
    ctx: Arc<AppContext>,
    vault: Vault<PublicState>,
}

/// Quote currencies Bithumb lists markets under.
const QUOTES: [&str; 2] = ["KRW", "BTC"];

impl BithumbPublic {
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
        Ok(BithumbPublic {
            ctx,
            vault: Vault::new(PublicState {
                http,
                currencies: CachedResult::new(CURRENCIES_TTL),
                tickers: CachedResult::new(TICKER_TTL),
                books: CachedResult::new(BOOK_TTL),
            }),
        })
    }

    /// Tickers of every market quoted in `quote`:
    /// `(market, last price, 24h volume)`.
    fn tickers_of(
        &self,
        quote: CurrencyCode,
    ) -> Result<Vec<(Market, MonetaryAmount, MonetaryAmount)>> {
        let mut state = self.vault.lock();
        let PublicState { http, tickers, .. } = &mut *state;
        let ctx = &self.ctx;
        tickers
            .get_with(quote, || {
                let endpoint = format!("/public/ticker/ALL_{quote}");
                let answer: Answer<serde_json::Map<String, serde_json::Value>> = query_json(
                    http,
                    &endpoint,
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut list = Vec::new();
                for (key, value) in unwrap_answer(answer)? {
                    // The payload mixes per-currency objects with a date
                    // field.
                    if key == "date" || !value.is_object() {
                        continue;
                    }
                    let Ok(ticker) = serde_json::from_value::<TickerData>(value) else {
                        continue;
                    };
                    let Ok(base) = ctx.standardize_currency(&key) else {
                        continue;
                    };
                    let market = Market::new(base, quote);
                    let volume = ticker
                        .units_traded_24h
                        .unwrap_or_default()
                        .with_currency(base);
                    list.push((market, ticker.closing_price.with_currency(quote), volume));
                }
                Ok(list)
            })
            .cloned()
    }

    fn all_tickers(&self) -> Result<Vec<(Market, MonetaryAmount, MonetaryAmount)>> {
        let mut all = Vec::new();
        for quote in QUOTES {
            all.extend(self.tickers_of(quote.into())?);
        }
        Ok(all)
    }

    fn pair_of(market: Market) -> String {
        market.assets_pair_str("_")
    }
}

impl VenuePublicApi for BithumbPublic {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn health_check(&self) -> Result<bool> {
        let mut state = self.vault.lock();
        let answer: Answer<serde_json::Value> = query_json(
            &mut state.http,
            "/public/ticker/BTC_KRW",
            &RequestOptions::get(),
            RetryPolicy::default(),
            accept_answer,
        )?;
        let healthy = answer.status == STATUS_OK;
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
                let answer: Answer<serde_json::Map<String, serde_json::Value>> = query_json(
                    http,
                    "/public/assetsstatus/ALL",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut set = CurrencyExchangeSet::new();
                // KRW itself never appears in the assets status payload.
                set.insert(CurrencyExchange {
                    standard_code: "KRW".into(),
                    venue_code: "KRW".into(),
                    alt_code: "KRW".into(),
                    can_deposit: true,
                    can_withdraw: true,
                    is_fiat: true,
                });
                for (key, value) in unwrap_answer(answer)? {
                    let Ok(status) = serde_json::from_value::<AssetStatus>(value) else {
                        continue;
                    };
                    let Ok(standard) = ctx.standardize_currency(&key) else {
                        continue;
                    };
                    let Ok(venue_code) = CurrencyCode::new(&key) else {
                        continue;
                    };
                    set.insert(CurrencyExchange {
                        standard_code: standard,
                        venue_code,
                        alt_code: venue_code,
                        can_deposit: status.deposit_status == 1,
                        can_withdraw: status.withdrawal_status == 1,
                        is_fiat: false,
                    });
                }
                Ok(set)
            })
            .cloned()
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        Ok(self
            .all_tickers()?
            .into_iter()
            .map(|(market, _, _)| market)
            .collect())
    }

    fn all_prices(&self) -> Result<MarketPriceMap> {
        Ok(self
            .all_tickers()?
            .into_iter()
            .map(|(market, price, _)| (market, price))
            .collect())
    }

    fn all_order_books(&self, depth: usize) -> Result<MarketOrderBookMap> {
        // One query per quote currency serves every market at depth 5.
        let mut books = MarketOrderBookMap::new();
        for quote in QUOTES {
            let quote: CurrencyCode = quote.into();
            let mut state = self.vault.lock();
            let endpoint = format!("/public/orderbook/ALL_{quote}");
            let answer: Answer<serde_json::Map<String, serde_json::Value>> = query_json(
                &mut state.http,
                &endpoint,
                &RequestOptions::get(),
                RetryPolicy::raising(3),
                accept_answer,
            )?;
            drop(state);
            let now = Utc::now();
            for (key, value) in unwrap_answer(answer)? {
                if !value.is_object() {
                    continue;
                }
                let Ok(data) = serde_json::from_value::<OrderBookData>(value) else {
                    continue;
                };
                let Ok(base) = self.ctx.standardize_currency(&key) else {
                    continue;
                };
                let market = Market::new(base, quote);
                books.insert(market, book_from_data(market, data, depth, now));
            }
        }
        Ok(books)
    }

    fn order_book(&self, market: Market, depth: usize) -> Result<MarketOrderBook> {
        let mut state = self.vault.lock();
        let PublicState { http, books, .. } = &mut *state;
        books
            .get_with(market, || {
                let endpoint = format!("/public/orderbook/{}", Self::pair_of(market));
                let answer: Answer<OrderBookData> = query_json(
                    http,
                    &endpoint,
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                Ok(book_from_data(
                    market,
                    unwrap_answer(answer)?,
                    depth,
                    Utc::now(),
                ))
            })
            .cloned()
    }

    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount> {
        self.all_tickers()?
            .into_iter()
            .find(|(candidate, _, _)| *candidate == market)
            .map(|(_, _, volume)| volume)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))
    }

    fn last_trades(&self, market: Market, nb_trades: usize) -> Result<Vec<PublicTrade>> {
        let mut state = self.vault.lock();
        let endpoint = format!("/public/transaction_history/{}", Self::pair_of(market));
        let answer: Answer<Vec<TransactionData>> = query_json(
            &mut state.http,
            &endpoint,
            &RequestOptions::get(),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let mut trades: Vec<PublicTrade> = unwrap_answer(answer)?
            .into_iter()
            .map(|transaction| PublicTrade {
                side: if transaction.side == "bid" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                amount: transaction.units_traded.with_currency(market.base()),
                price: transaction.price.with_currency(market.quote()),
                time: chrono::NaiveDateTime::parse_from_str(
                    &transaction.transaction_date,
                    "%Y-%m-%d %H:%M:%S",
                )
                .map(|naive| naive.and_utc())
                .unwrap_or_default(),
            })
            .collect();
        trades.sort_by_key(|trade| trade.time);
        trades.truncate(nb_trades);
        Ok(trades)
    }

    fn last_price(&self, market: Market) -> Result<MonetaryAmount> {
        self.all_tickers()?
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
        serde_json::json!({ "currencies": state.currencies.dump() })
    }

    fn load_caches(&self, snapshot: &serde_json::Value) {
        let mut state = self.vault.lock();
        state.currencies.load(&snapshot["currencies"]);
    }
}

fn book_from_data(
    market: Market,
    data: OrderBookData,
    depth: usize,
    now: chrono::DateTime<Utc>,
) -> MarketOrderBook {
    let to_lines = |levels: Vec<OrderBookLevel>| {
        levels
            .into_iter()
            .take(depth)
            .map(|level| OrderBookLine {
                price: level.price.with_currency(market.quote()),
                amount: level.quantity.with_currency(market.base()),
            })
            .collect()
    };
    MarketOrderBook::new(market, now, to_lines(data.asks), to_lines(data.bids))
}

// ── Private adapter ─────────────────────────────────────────────────

struct PrivateState {
    http: HttpClient,
    nonce: NonceClock,
    balance: CachedResult<(), BalanceMap>,
    wallets: CachedResult<CurrencyCode, Wallet>,
}

pub struct BithumbPrivate {
    ctx: Arc<AppContext>,
    account_name: String,
    credentials: ApiCredentials,
    vault: Vault<PrivateState>,
}

impl BithumbPrivate {
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
        Ok(BithumbPrivate {
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

    /// `Api-Sign` is the base64 of the hex HMAC-SHA512 digest of
    /// `endpoint NUL urlencoded-params NUL nonce`.
    fn signed_query<T>(
        http: &mut HttpClient,
        nonce: &mut NonceClock,
        credentials: &ApiCredentials,
        endpoint: &str,
        mut params: PostData,
        policy: RetryPolicy,
        accept: impl Fn(&T) -> crate::net::retry::RetryStatus,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let _ = params.set("endpoint", endpoint);
        let mut opts = RequestOptions::post().with_post_data(params);
        let secret = credentials.secret.clone();
        let key = credentials.key.clone();
        let endpoint_owned = endpoint.to_string();
        query_json_with(
            http,
            endpoint,
            &mut opts,
            policy,
            accept,
            move |opts| {
                let nonce_ms = nonce.next_ms().to_string();
                let encoded = opts.post_data.url_encode_except(url_unreserved);
                let message = format!("{endpoint_owned}\0{encoded}\0{nonce_ms}");
                let digest_hex = hmac_sha512_hex(secret.as_bytes(), message.as_bytes());
                let signature = BASE64.encode(digest_hex.as_bytes());
                opts.headers.retain(|(name, _)| {
                    name != "Api-Key" && name != "Api-Sign" && name != "Api-Nonce"
                });
                opts.headers.push(("Api-Key".into(), key.clone()));
                opts.headers.push(("Api-Sign".into(), signature));
                opts.headers.push(("Api-Nonce".into(), nonce_ms));
            },
        )
    }

    fn order_info_from(detail: &OrderDetailData, info: &TradeInfo) -> Result<OrderInfo> {
        let market = info.market;
        let mut matched_base = MonetaryAmount::zero(market.base());
        let mut matched_quote = MonetaryAmount::zero(market.quote());
        for contract in &detail.contract {
            let units = contract.units.with_currency(market.base());
            matched_base = matched_base.checked_add(units)?;
            let cost = units
                .to_neutral()
                .checked_mul(contract.price.with_currency(market.quote()))?;
            matched_quote = matched_quote.checked_add(cost)?;
        }
        let (from, to) = match info.side {
            TradeSide::Buy => (matched_quote, matched_base),
            TradeSide::Sell => (matched_base, matched_quote),
        };
        Ok(OrderInfo {
            traded: TradedAmounts::new(from, to),
            is_closed: matches!(detail.order_status.as_str(), "Completed" | "Cancel"),
        })
    }
}

impl VenuePrivateApi for BithumbPrivate {
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
                let mut params = PostData::new();
                params.append("currency", "ALL")?;
                let answer: Answer<serde_json::Map<String, serde_json::Value>> =
                    Self::signed_query(
                        http,
                        nonce,
                        credentials,
                        "/info/balance",
                        params,
                        RetryPolicy::raising(3),
                        accept_answer,
                    )?;
                let mut balances = BalanceMap::new();
                for (key, value) in unwrap_answer(answer)? {
                    let Some(raw) = key.strip_prefix("available_") else {
                        continue;
                    };
                    let Some(amount_str) = value.as_str() else {
                        continue;
                    };
                    let Ok(cur) = ctx.standardize_currency(raw) else {
                        continue;
                    };
                    let Ok(amount) = MonetaryAmount::parse_with(amount_str, cur) else {
                        continue;
                    };
                    if !amount.is_zero() {
                        balances.insert(cur, amount);
                    }
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
                let answer: Answer<WalletAddressData> = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    "/info/wallet_address",
                    params,
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let data = unwrap_answer(answer)?;
                // Tagged currencies come as `address&dt=tag`.
                let (address, tag) = match data.wallet_address.split_once('&') {
                    Some((address, tag_part)) => (
                        address.to_string(),
                        tag_part.split_once('=').map(|(_, tag)| tag.to_string()),
                    ),
                    None => (data.wallet_address, None),
                };
                Ok(Wallet {
                    venue: VENUE.into(),
                    account_name: account_name.clone(),
                    currency: cur,
                    address,
                    tag,
                })
            })
            .cloned()
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let Some(order_currency) = filter.cur1 else {
            warn!("{VENUE} needs a currency filter to list open orders");
            return Ok(Vec::new());
        };
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("order_currency", order_currency)?;
        params.append("payment_currency", filter.cur2.unwrap_or("KRW".into()))?;
        let answer: Answer<Vec<OpenOrderData>> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/info/orders",
            params,
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let mut orders = Vec::new();
        for data in unwrap_answer(answer).unwrap_or_default() {
            let Ok(base) = self.ctx.standardize_currency(&data.order_currency) else {
                continue;
            };
            let Ok(quote) = self.ctx.standardize_currency(&data.payment_currency) else {
                continue;
            };
            let market = Market::new(base, quote);
            let order = Order {
                id: data.order_id,
                market,
                side: if data.side == "bid" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: data.price.with_currency(quote),
                matched_volume: data
                    .units
                    .checked_sub(data.units_remaining)?
                    .with_currency(base),
                remaining_volume: data.units_remaining.with_currency(base),
                placed_time: Utc
                    .timestamp_micros(data.order_date)
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
        // Bithumb only exposes per-order detail for closed orders.
        Ok(Vec::new())
    }

    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize> {
        let opened = self.opened_orders(filter)?;
        let mut nb_cancelled = 0;
        for order in opened {
            let info = TradeInfo {
                market: order.market,
                side: order.side,
                options: Default::default(),
            };
            match self.cancel_order(&order.id, &info) {
                Ok(_) => nb_cancelled += 1,
                Err(err) => warn!("could not cancel order {}: {err}", order.id),
            }
        }
        Ok(nb_cancelled)
    }

    fn recent_deposits(&self, filter: &TransferConstraints) -> Result<Vec<Deposit>> {
        user_transactions(self, filter, TransactionKind::Deposit).map(|entries| {
            entries
                .into_iter()
                .map(|(id, amount, time)| Deposit {
                    id,
                    amount,
                    time,
                    is_settled: true,
                })
                .collect()
        })
    }

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        user_transactions(self, filter, TransactionKind::Withdrawal).map(|entries| {
            entries
                .into_iter()
                .map(|(id, amount, time)| Withdraw {
                    id,
                    amount: amount.abs(),
                    fee: MonetaryAmount::zero(amount.currency()),
                    time,
                    is_sent: true,
                })
                .collect()
        })
    }

    fn place_order(
        &self,
        from: MonetaryAmount,
        volume: MonetaryAmount,
        price: MonetaryAmount,
        info: &TradeInfo,
    ) -> Result<PlaceOrderInfo> {
        if info.options.is_simulation {
            // No native simulation: refuse unless the venue config opted in
            // to placing real orders in simulation mode.
            if !self
                .ctx
                .venue_config(VENUE)
                .place_simulate_real_order
            {
                return Err(ExchangeError::Capability(format!(
                    "{VENUE} cannot simulate orders; enable place_simulate_real_order to allow real placement"
                )));
            }
            info!("{VENUE}: placing a REAL order for a simulated trade, per venue config");
        }
        let market = info.market;
        let mut params = PostData::new();
        params.append("order_currency", market.base())?;
        params.append("payment_currency", market.quote())?;
        params.append("units", volume.with_currency(CurrencyCode::neutral()))?;
        params.append("price", price.with_currency(CurrencyCode::neutral()))?;
        params.append(
            "type",
            match info.side {
                TradeSide::Buy => "bid",
                TradeSide::Sell => "ask",
            },
        )?;
        info!(
            "{VENUE}: place {} order of {from} on {market} at {price}",
            info.side
        );
        // The placement payload carries its order id at top level, outside
        // the usual data envelope.
        let answer: PlacedOrderAnswer = {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/trade/place",
                params,
                RetryPolicy::raising(1),
                |placed: &PlacedOrderAnswer| {
                    if STATUS_RETRYABLE.contains(&placed.status.as_str()) {
                        RetryStatus::Reject
                    } else {
                        RetryStatus::Accept
                    }
                },
            )?
        };
        if answer.status != STATUS_OK {
            return Err(ExchangeError::VenueProtocol {
                venue: VENUE,
                reason: format!("status {}: {}", answer.status, answer.message),
            });
        }
        let order_info = self.query_order_info(&answer.order_id, info)?;
        Ok(PlaceOrderInfo {
            order_id: answer.order_id,
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
            params.append(
                "type",
                match info.side {
                    TradeSide::Buy => "bid",
                    TradeSide::Sell => "ask",
                },
            )?;
            params.append("order_id", order_id)?;
            params.append("order_currency", info.market.base())?;
            params.append("payment_currency", info.market.quote())?;
            let _: Answer<serde_json::Value> = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/trade/cancel",
                params,
                RetryPolicy::raising(1),
                accept_answer,
            )?;
        }
        self.query_order_info(order_id, info)
    }

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("order_id", order_id)?;
        params.append("order_currency", info.market.base())?;
        params.append("payment_currency", info.market.quote())?;
        let answer: Answer<OrderDetailData> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/info/order_detail",
            params,
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        Self::order_info_from(&unwrap_answer(answer)?, info)
    }

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("units", gross_amount.with_currency(CurrencyCode::neutral()))?;
        params.append("address", destination.address.as_str())?;
        if let Some(tag) = &destination.tag {
            params.append("destination", tag.as_str())?;
        }
        params.append("currency", gross_amount.currency())?;
        info!("{VENUE}: withdraw {gross_amount} towards {destination}");
        let _: Answer<serde_json::Value> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/trade/btc_withdrawal",
            params,
            RetryPolicy::raising(1),
            accept_answer,
        )?;
        // Bithumb does not return a withdrawal id: track by amount.
        Ok(InitiatedWithdrawInfo {
            withdraw_id: uuid::Uuid::new_v4().to_string(),
            gross_amount,
            receiving_wallet: destination.clone(),
            initiated_time: Utc::now(),
        })
    }

    fn is_withdraw_successfully_sent(
        &self,
        initiated: &InitiatedWithdrawInfo,
    ) -> Result<SentWithdrawInfo> {
        let filter = TransferConstraints::with_currency(initiated.gross_amount.currency());
        let withdraws = self.recent_withdraws(&filter)?;
        Ok(withdraws
            .into_iter()
            .filter(|withdraw| withdraw.time >= initiated.initiated_time)
            .find(|withdraw| withdraw.amount == initiated.gross_amount)
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

#[derive(Clone, Copy)]
enum TransactionKind {
    Deposit,
    Withdrawal,
}

/// Shared user transaction listing: `(id, amount, time)` rows.
fn user_transactions(
    api: &BithumbPrivate,
    filter: &TransferConstraints,
    kind: TransactionKind,
) -> Result<Vec<(String, MonetaryAmount, chrono::DateTime<Utc>)>> {
    #[derive(Deserialize)]
    struct TransactionRow {
        #[serde(default)]
        transfer_date: i64,
        #[serde(default)]
        units: String,
        #[serde(default)]
        order_currency: String,
    }

    let Some(cur) = filter.currency else {
        warn!("{VENUE} needs a currency filter to list transfers");
        return Ok(Vec::new());
    };
    let mut state = api.vault.lock();
    let PrivateState { http, nonce, .. } = &mut *state;
    let mut params = PostData::new();
    params.append(
        "searchGb",
        match kind {
            TransactionKind::Deposit => "4",
            TransactionKind::Withdrawal => "5",
        },
    )?;
    params.append("order_currency", cur)?;
    params.append("payment_currency", "KRW")?;
    let answer: Answer<Vec<TransactionRow>> = BithumbPrivate::signed_query(
        http,
        nonce,
        &api.credentials,
        "/info/user_transactions",
        params,
        RetryPolicy::raising(3),
        accept_answer,
    )?;
    let mut entries = Vec::new();
    for row in unwrap_answer(answer).unwrap_or_default() {
        let Ok(row_cur) = api.ctx.standardize_currency(&row.order_currency) else {
            continue;
        };
        if row_cur != cur {
            continue;
        }
        let Ok(amount) = MonetaryAmount::parse_with(row.units.replace(' ', "").as_str(), cur)
        else {
            continue;
        };
        let time = Utc
            .timestamp_micros(row.transfer_date)
            .single()
            .unwrap_or_default();
        if !filter.accepts_time(time) {
            continue;
        }
        entries.push((row.transfer_date.to_string(), amount, time));
    }
    Ok(entries)
}
