use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
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
use crate::venues::signing::{hmac_sha512, sha256, NonceClock};

const VENUE: &str = "kraken";

const BASE_URL: &str = "https://api.kraken.com";

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
    error: Vec<String>,
    result: Option<T>,
}

fn accept_answer<T>(answer: &Answer<T>) -> RetryStatus {
    let retryable = answer.error.iter().any(|error| {
        error.contains("Rate limit")
            || error.contains("Unavailable")
            || error.contains("Busy")
            || error.contains("Invalid nonce")
    });
    if retryable {
        RetryStatus::Reject
    } else {
        RetryStatus::Accept
    }
}

fn unwrap_answer<T>(answer: Answer<T>) -> Result<T> {
    if let Some(error) = answer.error.first() {
        return Err(ExchangeError::VenueProtocol {
            venue: VENUE,
            reason: error.clone(),
        });
    }
    answer.result.ok_or_else(|| ExchangeError::VenueProtocol {
        venue: VENUE,
        reason: "missing result field".into(),
    })
}

#[derive(Deserialize)]
struct AssetInfo {
    altname: String,
}

#[derive(Deserialize)]
struct AssetPairInfo {
    base: String,
    quote: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize, Default)]
struct TickerEntry {
    /// ask: [price, whole lot volume, lot volume]
    #[serde(default)]
    a: Vec<MonetaryAmount>,
    /// bid
    #[serde(default)]
    b: Vec<MonetaryAmount>,
    /// last trade closed: [price, lot volume]
    #[serde(default)]
    c: Vec<MonetaryAmount>,
    /// volume: [today, last 24 hours]
    #[serde(default)]
    v: Vec<MonetaryAmount>,
}

#[derive(Deserialize, Default)]
struct DepthEntry {
    #[serde(default)]
    asks: Vec<(MonetaryAmount, MonetaryAmount, i64)>,
    #[serde(default)]
    bids: Vec<(MonetaryAmount, MonetaryAmount, i64)>,
}

#[derive(Deserialize, Default)]
struct SystemStatusAnswer {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct DepositMethod {
    method: String,
}

#[derive(Deserialize)]
struct DepositAddress {
    address: String,
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Deserialize, Default)]
struct OrderDescription {
    #[serde(default)]
    pair: String,
    #[serde(default, rename = "type")]
    side: String,
    #[serde(default)]
    price: MonetaryAmount,
}

#[derive(Deserialize, Default)]
struct OrderEntry {
    #[serde(default)]
    descr: OrderDescription,
    #[serde(default)]
    vol: MonetaryAmount,
    #[serde(default)]
    vol_exec: MonetaryAmount,
    #[serde(default)]
    cost: MonetaryAmount,
    #[serde(default)]
    status: String,
    #[serde(default)]
    opentm: f64,
}

#[derive(Deserialize, Default)]
struct OpenOrdersAnswer {
    #[serde(default)]
    open: BTreeMap<String, OrderEntry>,
}

#[derive(Deserialize, Default)]
struct ClosedOrdersAnswer {
    #[serde(default)]
    closed: BTreeMap<String, OrderEntry>,
}

#[derive(Deserialize, Default)]
struct AddOrderAnswer {
    #[serde(default)]
    txid: Vec<String>,
}

#[derive(Deserialize)]
struct MovementEntry {
    #[serde(default)]
    refid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    amount: MonetaryAmount,
    #[serde(default)]
    fee: MonetaryAmount,
    #[serde(default)]
    time: i64,
}

#[derive(Deserialize, Default)]
struct WithdrawAnswer {
    refid: String,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct MarketsInfo {
    markets: MarketSet,
    /// Kraken pair key (e.g. `XXBTZEUR`) per market, venue orientation.
    pairs: Vec<(String, Market)>,
}

impl MarketsInfo {
    fn market_of(&self, pair: &str) -> Option<Market> {
        self.pairs
            .iter()
            .find(|(name, _)| name == pair)
            .map(|(_, market)| *market)
    }

    fn pair_of(&self, market: Market) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(_, candidate)| *candidate == market || candidate.reverse() == market)
            .map(|(name, _)| name.as_str())
    }
}

// ── Public adapter ──────────────────────────────────────────────────

struct PublicState {
    http: HttpClient,
    currencies: CachedResult<(), CurrencyExchangeSet>,
    markets: CachedResult<(), MarketsInfo>,
    tickers: CachedResult<(), HashMap<String, TickerEntryOwned>>,
    books: CachedResult<(Market, usize), MarketOrderBook>,
}

/// Ticker data mapped out of the venue layout, cache- and serde-friendly.
#[derive(Clone, Default, Serialize, Deserialize)]
struct TickerEntryOwned {
    ask_price: MonetaryAmount,
    bid_price: MonetaryAmount,
    last_price: MonetaryAmount,
    volume_24h: MonetaryAmount,
}

pub struct KrakenPublic {
    ctx: Arc<AppContext>,
    vault: Vault<PublicState>,
}

impl KrakenPublic {
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
        Ok(KrakenPublic {
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

    fn markets_info(&self) -> Result<MarketsInfo> {
        let mut state = self.vault.lock();
        let PublicState { http, markets, .. } = &mut *state;
        let ctx = &self.ctx;
        markets
            .get(|| {
                let answer: Answer<BTreeMap<String, AssetPairInfo>> = query_json(
                    http,
                    "/0/public/AssetPairs",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut info = MarketsInfo::default();
                for (pair, details) in unwrap_answer(answer)? {
                    if !details.status.is_empty() && details.status != "online" {
                        continue;
                    }
                    let base = standardize_asset(ctx, &details.base)?;
                    let quote = standardize_asset(ctx, &details.quote)?;
                    let market = Market::new(base, quote);
                    info.markets.insert(market);
                    info.pairs.push((pair, market));
                }
                Ok(info)
            })
            .cloned()
    }

    fn tickers(&self) -> Result<HashMap<String, TickerEntryOwned>> {
        let info = self.markets_info()?;
        let mut state = self.vault.lock();
        let PublicState { http, tickers, .. } = &mut *state;
        tickers
            .get(|| {
                let answer: Answer<BTreeMap<String, TickerEntry>> = query_json(
                    http,
                    "/0/public/Ticker",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut map = HashMap::new();
                for (pair, entry) in unwrap_answer(answer)? {
                    let Some(market) = info.market_of(&pair) else {
                        continue;
                    };
                    let price_of = |values: &Vec<MonetaryAmount>| {
                        values
                            .first()
                            .copied()
                            .unwrap_or_default()
                            .with_currency(market.quote())
                    };
                    map.insert(
                        pair,
                        TickerEntryOwned {
                            ask_price: price_of(&entry.a),
                            bid_price: price_of(&entry.b),
                            last_price: price_of(&entry.c),
                            volume_24h: entry
                                .v
                                .get(1)
                                .copied()
                                .unwrap_or_default()
                                .with_currency(market.base()),
                        },
                    );
                }
                Ok(map)
            })
            .cloned()
    }
}

/// Kraken prefixes legacy assets with X (crypto) or Z (fiat).
fn standardize_asset(ctx: &AppContext, asset: &str) -> Result<CurrencyCode> {
    if asset.len() == 4 && (asset.starts_with('X') || asset.starts_with('Z')) {
        if let Ok(cur) = ctx.standardize_currency(&asset[1..]) {
            return Ok(cur);
        }
    }
    ctx.standardize_currency(asset)
}

impl VenuePublicApi for KrakenPublic {
    fn name(&self) -> &'static str {
        VENUE
    }

    fn health_check(&self) -> Result<bool> {
        let mut state = self.vault.lock();
        let answer: Answer<SystemStatusAnswer> = query_json(
            &mut state.http,
            "/0/public/SystemStatus",
            &RequestOptions::get(),
            RetryPolicy::default(),
            accept_answer,
        )?;
        let healthy = answer
            .result
            .map(|status| status.status == "online")
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
                let answer: Answer<BTreeMap<String, AssetInfo>> = query_json(
                    http,
                    "/0/public/Assets",
                    &RequestOptions::get(),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let mut set = CurrencyExchangeSet::new();
                for (asset, details) in unwrap_answer(answer)? {
                    let Ok(standard) = standardize_asset(ctx, &asset) else {
                        continue;
                    };
                    let Ok(venue_code) = CurrencyCode::new(&asset) else {
                        continue;
                    };
                    let alt = CurrencyCode::new(&details.altname).unwrap_or(venue_code);
                    set.insert(CurrencyExchange {
                        standard_code: standard,
                        venue_code,
                        alt_code: alt,
                        can_deposit: true,
                        can_withdraw: true,
                        is_fiat: ctx.is_fiat(standard),
                    });
                }
                Ok(set)
            })
            .cloned()
    }

    fn tradable_markets(&self) -> Result<MarketSet> {
        Ok(self.markets_info()?.markets)
    }

    fn all_prices(&self) -> Result<MarketPriceMap> {
        let info = self.markets_info()?;
        let tickers = self.tickers()?;
        let mut map = MarketPriceMap::new();
        for (pair, ticker) in tickers {
            if let Some(market) = info.market_of(&pair) {
                map.insert(market, ticker.last_price);
            }
        }
        Ok(map)
    }

    fn all_order_books(&self, _depth: usize) -> Result<MarketOrderBookMap> {
        let info = self.markets_info()?;
        let tickers = self.tickers()?;
        let now = Utc::now();
        let mut books = MarketOrderBookMap::new();
        for (pair, ticker) in tickers {
            let Some(market) = info.market_of(&pair) else {
                continue;
            };
            // Depth-1 books out of the ticker top of book.
            let line = |price: MonetaryAmount| OrderBookLine {
                price,
                amount: MonetaryAmount::zero(market.base()),
            };
            books.insert(
                market,
                MarketOrderBook::new(
                    market,
                    now,
                    vec![line(ticker.ask_price)],
                    vec![line(ticker.bid_price)],
                ),
            );
        }
        Ok(books)
    }

    fn order_book(&self, market: Market, depth: usize) -> Result<MarketOrderBook> {
        let info = self.markets_info()?;
        let pair = info
            .pair_of(market)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))?
            .to_string();
        let mut state = self.vault.lock();
        let PublicState { http, books, .. } = &mut *state;
        books
            .get_with((market, depth), || {
                let mut params = PostData::new();
                params.append("pair", pair.as_str())?;
                params.append("count", depth)?;
                let answer: Answer<BTreeMap<String, DepthEntry>> = query_json(
                    http,
                    "/0/public/Depth",
                    &RequestOptions::get().with_post_data(params),
                    RetryPolicy::raising(3),
                    accept_answer,
                )?;
                let entries = unwrap_answer(answer)?;
                let entry = entries.into_values().next().unwrap_or_default();
                let to_lines = |levels: Vec<(MonetaryAmount, MonetaryAmount, i64)>| {
                    levels
                        .into_iter()
                        .map(|(price, amount, _)| OrderBookLine {
                            price: price.with_currency(market.quote()),
                            amount: amount.with_currency(market.base()),
                        })
                        .collect()
                };
                Ok(MarketOrderBook::new(
                    market,
                    Utc::now(),
                    to_lines(entry.asks),
                    to_lines(entry.bids),
                ))
            })
            .cloned()
    }

    fn last_24h_volume(&self, market: Market) -> Result<MonetaryAmount> {
        let info = self.markets_info()?;
        let pair = info
            .pair_of(market)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))?
            .to_string();
        let tickers = self.tickers()?;
        tickers
            .get(&pair)
            .map(|ticker| ticker.volume_24h)
            .ok_or_else(|| ExchangeError::NotFound(format!("no ticker for {market} on {VENUE}")))
    }

    fn last_trades(&self, market: Market, nb_trades: usize) -> Result<Vec<PublicTrade>> {
        let info = self.markets_info()?;
        let pair = info
            .pair_of(market)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))?
            .to_string();
        let mut state = self.vault.lock();
        let mut params = PostData::new();
        params.append("pair", pair.as_str())?;
        let answer: Answer<serde_json::Map<String, serde_json::Value>> = query_json(
            &mut state.http,
            "/0/public/Trades",
            &RequestOptions::get().with_post_data(params),
            RetryPolicy::raising(3),
            accept_answer,
        )?;
        let result = unwrap_answer(answer)?;
        // Rows are [price, volume, time, side, order type, misc, ...].
        let mut trades = Vec::new();
        if let Some(rows) = result.get(&pair).and_then(|value| value.as_array()) {
            for row in rows {
                let Some(row) = row.as_array() else { continue };
                let price = row
                    .first()
                    .and_then(|value| value.as_str())
                    .and_then(|raw| MonetaryAmount::parse_with(raw, market.quote()).ok());
                let amount = row
                    .get(1)
                    .and_then(|value| value.as_str())
                    .and_then(|raw| MonetaryAmount::parse_with(raw, market.base()).ok());
                let time = row.get(2).and_then(|value| value.as_f64());
                let side = row.get(3).and_then(|value| value.as_str());
                if let (Some(price), Some(amount), Some(time), Some(side)) =
                    (price, amount, time, side)
                {
                    trades.push(PublicTrade {
                        side: if side == "b" {
                            TradeSide::Buy
                        } else {
                            TradeSide::Sell
                        },
                        amount,
                        price,
                        time: Utc
                            .timestamp_millis_opt((time * 1000.0) as i64)
                            .single()
                            .unwrap_or_default(),
                    });
                }
            }
        }
        trades.sort_by_key(|trade| trade.time);
        trades.truncate(nb_trades);
        Ok(trades)
    }

    fn last_price(&self, market: Market) -> Result<MonetaryAmount> {
        let info = self.markets_info()?;
        let pair = info
            .pair_of(market)
            .ok_or_else(|| ExchangeError::NotFound(format!("market {market} not on {VENUE}")))?
            .to_string();
        let tickers = self.tickers()?;
        tickers
            .get(&pair)
            .map(|ticker| ticker.last_price)
            .ok_or_else(|| ExchangeError::NotFound(format!("no ticker for {market} on {VENUE}")))
    }

    fn withdrawal_fees(&self) -> Result<WithdrawalFeeMap> {
        Ok(self.ctx.load_static_withdrawal_fees(VENUE))
    }

    fn dump_caches(&self) -> serde_json::Value {
        let state = self.vault.lock();
        serde_json::json!({
            "currencies": state.currencies.dump(),
            "markets": state.markets.dump(),
        })
    }

    fn load_caches(&self, snapshot: &serde_json::Value) {
        let mut state = self.vault.lock();
        state.currencies.load(&snapshot["currencies"]);
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

pub struct KrakenPrivate {
    ctx: Arc<AppContext>,
    public_markets: KrakenPublic,
    account_name: String,
    credentials: ApiCredentials,
    vault: Vault<PrivateState>,
}

impl KrakenPrivate {
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
        Ok(KrakenPrivate {
            public_markets: KrakenPublic::new(Arc::clone(&ctx))?,
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

    /// `API-Sign` is `HMAC-SHA512(b64decode(secret), path + SHA256(nonce +
    /// postdata))`, base64-encoded, with the nonce refreshed per attempt.
    fn signed_query<T>(
        http: &mut HttpClient,
        nonce: &mut NonceClock,
        credentials: &ApiCredentials,
        endpoint: &str,
        params: PostData,
        policy: RetryPolicy,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let secret = BASE64.decode(&credentials.secret).map_err(|err| {
            ExchangeError::InvalidArgument(format!("kraken secret is not base64: {err}"))
        })?;
        let key = credentials.key.clone();
        let endpoint_owned = endpoint.to_string();
        let mut opts = RequestOptions::post().with_post_data(params);
        query_json_with(
            http,
            endpoint,
            &mut opts,
            policy,
            accept_answer,
            move |opts| {
                let _ = opts.post_data.set("nonce", nonce.next_ms());
                let mut message = opts
                    .post_data
                    .get("nonce")
                    .unwrap_or_default()
                    .to_string();
                message.push_str(opts.post_data.to_signing_string());
                let mut mac_input = endpoint_owned.as_bytes().to_vec();
                mac_input.extend_from_slice(&sha256(message.as_bytes()));
                let signature = BASE64.encode(hmac_sha512(&secret, &mac_input));
                opts.headers.retain(|(name, _)| name != "API-Sign" && name != "API-Key");
                opts.headers.push(("API-Key".into(), key.clone()));
                opts.headers.push(("API-Sign".into(), signature));
            },
        )
        .and_then(unwrap_answer)
    }

    fn order_info_from(entry: &OrderEntry, info: &TradeInfo) -> OrderInfo {
        let market = info.market;
        let (from, to) = match info.side {
            TradeSide::Buy => (
                entry.cost.with_currency(market.quote()),
                entry.vol_exec.with_currency(market.base()),
            ),
            TradeSide::Sell => (
                entry.vol_exec.with_currency(market.base()),
                entry.cost.with_currency(market.quote()),
            ),
        };
        OrderInfo {
            traded: TradedAmounts::new(from, to),
            is_closed: matches!(entry.status.as_str(), "closed" | "canceled" | "expired"),
        }
    }

    fn orders_from(
        &self,
        entries: BTreeMap<String, OrderEntry>,
        filter: &OrdersConstraints,
    ) -> Result<Vec<Order>> {
        let info = self.public_markets.markets_info()?;
        let mut orders = Vec::new();
        for (id, entry) in entries {
            let Some(market) = info.market_of(&entry.descr.pair).or_else(|| {
                info.pairs
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&entry.descr.pair))
                    .map(|(_, market)| *market)
            }) else {
                continue;
            };
            let order = Order {
                id,
                market,
                side: if entry.descr.side == "buy" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                price: entry.descr.price.with_currency(market.quote()),
                matched_volume: entry.vol_exec.with_currency(market.base()),
                remaining_volume: entry
                    .vol
                    .checked_sub(entry.vol_exec)?
                    .with_currency(market.base()),
                placed_time: Utc
                    .timestamp_millis_opt((entry.opentm * 1000.0) as i64)
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
}

impl VenuePrivateApi for KrakenPrivate {
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
                let answer: BTreeMap<String, MonetaryAmount> = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    "/0/private/Balance",
                    PostData::new(),
                    RetryPolicy::raising(3),
                )?;
                let mut balances = BalanceMap::new();
                for (asset, amount) in answer {
                    if amount.is_zero() {
                        continue;
                    }
                    let cur = standardize_asset(ctx, &asset)?;
                    balances.insert(cur, amount.with_currency(cur));
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
                params.append("asset", cur)?;
                let methods: Vec<DepositMethod> = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    "/0/private/DepositMethods",
                    params.clone(),
                    RetryPolicy::raising(3),
                )?;
                let method = methods.first().ok_or_else(|| {
                    ExchangeError::NotFound(format!("no deposit method for {cur} on {VENUE}"))
                })?;
                params.append("method", method.method.as_str())?;
                let addresses: Vec<DepositAddress> = Self::signed_query(
                    http,
                    nonce,
                    credentials,
                    "/0/private/DepositAddresses",
                    params,
                    RetryPolicy::raising(3),
                )?;
                let address = addresses.into_iter().next().ok_or_else(|| {
                    ExchangeError::NotFound(format!("no deposit address for {cur} on {VENUE}"))
                })?;
                Ok(Wallet {
                    venue: VENUE.into(),
                    account_name: account_name.clone(),
                    currency: cur,
                    address: address.address,
                    tag: address.tag,
                })
            })
            .cloned()
    }

    fn can_generate_deposit_address(&self) -> bool {
        // Kraken only serves addresses that were created in the UI.
        false
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let answer: OpenOrdersAnswer = {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/0/private/OpenOrders",
                PostData::new(),
                RetryPolicy::raising(3),
            )?
        };
        self.orders_from(answer.open, filter)
    }

    fn closed_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>> {
        let answer: ClosedOrdersAnswer = {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/0/private/ClosedOrders",
                PostData::new(),
                RetryPolicy::raising(3),
            )?
        };
        self.orders_from(answer.closed, filter)
    }

    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize> {
        let opened = self.opened_orders(filter)?;
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut nb_cancelled = 0;
        for order in opened {
            let mut params = PostData::new();
            params.append("txid", order.id.as_str())?;
            let cancelled: Result<serde_json::Value> = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/0/private/CancelOrder",
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
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(cur) = filter.currency {
            params.append("asset", cur)?;
        }
        let entries: Vec<MovementEntry> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/0/private/DepositStatus",
            params,
            RetryPolicy::raising(3),
        )?;
        let cur = filter.currency.unwrap_or_default();
        let mut deposits = Vec::new();
        for entry in entries {
            let time = Utc.timestamp_opt(entry.time, 0).single().unwrap_or_default();
            if !filter.accepts_time(time) || !filter.accepts_id(&entry.refid) {
                continue;
            }
            deposits.push(Deposit {
                id: entry.refid,
                amount: entry.amount.with_currency(cur),
                time,
                is_settled: entry.status == "Success",
            });
        }
        Ok(deposits)
    }

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        if let Some(cur) = filter.currency {
            params.append("asset", cur)?;
        }
        let entries: Vec<MovementEntry> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/0/private/WithdrawStatus",
            params,
            RetryPolicy::raising(3),
        )?;
        let cur = filter.currency.unwrap_or_default();
        let mut withdraws = Vec::new();
        for entry in entries {
            let time = Utc.timestamp_opt(entry.time, 0).single().unwrap_or_default();
            if !filter.accepts_time(time) || !filter.accepts_id(&entry.refid) {
                continue;
            }
            withdraws.push(Withdraw {
                id: entry.refid,
                amount: entry.amount.with_currency(cur),
                fee: entry.fee.with_currency(cur),
                time,
                is_sent: entry.status == "Success",
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
        let markets = self.public_markets.markets_info()?;
        let pair = markets
            .pair_of(info.market)
            .ok_or_else(|| {
                ExchangeError::NotFound(format!("market {} not on {VENUE}", info.market))
            })?
            .to_string();
        let mut params = PostData::new();
        params.append("pair", pair.as_str())?;
        params.append(
            "type",
            match info.side {
                TradeSide::Buy => "buy",
                TradeSide::Sell => "sell",
            },
        )?;
        params.append("ordertype", "limit")?;
        params.append("price", price.with_currency(CurrencyCode::neutral()))?;
        params.append("volume", volume.with_currency(CurrencyCode::neutral()))?;
        if info.options.is_simulation {
            // Kraken validates without placing.
            params.append("validate", "true")?;
        }
        info!(
            "{VENUE}: place {} order of {from} on {} at {price}{}",
            info.side,
            info.market,
            if info.options.is_simulation { " (validate)" } else { "" },
        );
        let answer: AddOrderAnswer = {
            let mut state = self.vault.lock();
            let PrivateState { http, nonce, .. } = &mut *state;
            Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/0/private/AddOrder",
                params,
                RetryPolicy::raising(1),
            )?
        };
        if info.options.is_simulation {
            return Ok(PlaceOrderInfo {
                order_id: "validated".into(),
                traded: TradedAmounts::zero(
                    from.currency(),
                    info.market.opposite_of(from.currency()).unwrap_or_default(),
                ),
                is_closed: true,
                is_simulation: true,
            });
        }
        let order_id = answer.txid.into_iter().next().ok_or_else(|| {
            ExchangeError::VenueProtocol {
                venue: VENUE,
                reason: "order accepted without transaction id".into(),
            }
        })?;
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
            let PrivateState { http, nonce, .. } = &mut *state;
            let mut params = PostData::new();
            params.append("txid", order_id)?;
            let _: serde_json::Value = Self::signed_query(
                http,
                nonce,
                &self.credentials,
                "/0/private/CancelOrder",
                params,
                RetryPolicy::raising(1),
            )?;
        }
        self.query_order_info(order_id, info)
    }

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("txid", order_id)?;
        let answer: BTreeMap<String, OrderEntry> = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/0/private/QueryOrders",
            params,
            RetryPolicy::raising(3),
        )?;
        let entry = answer.get(order_id).ok_or_else(|| {
            ExchangeError::NotFound(format!("order {order_id} not found on {VENUE}"))
        })?;
        Ok(Self::order_info_from(entry, info))
    }

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo> {
        let mut state = self.vault.lock();
        let PrivateState { http, nonce, .. } = &mut *state;
        let mut params = PostData::new();
        params.append("asset", gross_amount.currency())?;
        // Kraken withdraws to named keys configured in the account; the
        // convention is `<destination venue>_<currency>`.
        let key_name = format!(
            "{}_{}",
            destination.venue,
            destination.currency.as_str().to_ascii_lowercase()
        );
        params.append("key", key_name.as_str())?;
        params.append(
            "amount",
            gross_amount.with_currency(CurrencyCode::neutral()),
        )?;
        info!("{VENUE}: withdraw {gross_amount} towards {destination}");
        let answer: WithdrawAnswer = Self::signed_query(
            http,
            nonce,
            &self.credentials,
            "/0/private/Withdraw",
            params,
            RetryPolicy::raising(1),
        )?;
        Ok(InitiatedWithdrawInfo {
            withdraw_id: answer.refid,
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
