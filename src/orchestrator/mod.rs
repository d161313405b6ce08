pub mod select;
pub mod trade;
pub mod withdraw;

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::api::fiat::FiatConverter;
use crate::api::private::{BalanceMap, VenuePrivateApi};
use crate::api::public::{
    convert_at_average_price, find_markets_path, CurrencyExchangeSet, MarketOrderBookMap,
    MarketPriceMap, MarketSet, VenuePublicApi,
};
use crate::api::MarketPathMode;
use crate::context::AppContext;
use crate::errors::{ExchangeError, Result};
use crate::model::currency::CurrencyCode;
use crate::model::market::Market;
use crate::model::monetary::MonetaryAmount;
use crate::model::orderbook::MarketOrderBook;
use crate::model::trade::{
    Deposit, Order, OrdersConstraints, PublicTrade, TransferConstraints, Withdraw,
};
use crate::model::wallet::Wallet;
use crate::venues::VenueKind;

pub use select::{AccountFilter, ExchangeName, SelectionOrder};
pub use trade::{DustSweeperResult, TradedAmountsPerExchange};
pub use withdraw::{WithdrawMode, WithdrawOptions};

/// One account configured on a venue.
pub struct ExchangeAccount {
    pub name: String,
    pub api: Box<dyn VenuePrivateApi>,
}

/// A venue with its public API and zero or more private accounts.
pub struct Exchange {
    pub kind: VenueKind,
    pub public: Box<dyn VenuePublicApi>,
    pub accounts: Vec<ExchangeAccount>,
}

impl Exchange {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Index-based selection entry, cheap to ship across the worker pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Selected {
    exchange_idx: usize,
    account_idx: Option<usize>,
}

/// Result row labeled with its `venue[_account]` reference.
pub type PerExchange<R> = Vec<(String, R)>;

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub amount: MonetaryAmount,
    /// Value converted into the requested equivalent currency, when known.
    pub equivalent: Option<MonetaryAmount>,
}

/// Coordinates read and write operations across venues and accounts.
///
/// Holds the venue adapters; its own state is only the selection scratch of
/// each call, so a shared reference is enough for concurrent use.
pub struct Orchestrator {
    ctx: Arc<AppContext>,
    fiat_converter: Arc<FiatConverter>,
    exchanges: Vec<Exchange>,
    pool: rayon::ThreadPool,
}

impl Orchestrator {
    pub fn new(
        ctx: Arc<AppContext>,
        fiat_converter: Arc<FiatConverter>,
        exchanges: Vec<Exchange>,
        nb_threads: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nb_threads)
            .thread_name(|index| format!("venue-worker-{index}"))
            .build()
            .map_err(|err| ExchangeError::InvalidArgument(format!("worker pool: {err}")))?;
        Ok(Orchestrator {
            ctx,
            fiat_converter,
            exchanges,
            pool,
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn fiat_converter(&self) -> &FiatConverter {
        &self.fiat_converter
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Resolves `venue[_account]` references into venue/account entries.
    ///
    /// An empty list selects everything. Each element matches either a
    /// whole venue (all its accounts) or one specific account. Unknown
    /// references are an error, not an empty result.
    pub fn select(
        &self,
        names: &[ExchangeName],
        order: SelectionOrder,
        filter: AccountFilter,
    ) -> Result<Vec<Selected>> {
        let mut selected: Vec<Selected> = Vec::new();
        let push_unique = |entry: Selected, selected: &mut Vec<Selected>| {
            if !selected.contains(&entry) {
                selected.push(entry);
            }
        };

        if names.is_empty() {
            for (exchange_idx, exchange) in self.exchanges.iter().enumerate() {
                if exchange.accounts.is_empty() {
                    if filter == AccountFilter::Any {
                        selected.push(Selected {
                            exchange_idx,
                            account_idx: None,
                        });
                    }
                } else {
                    for account_idx in 0..exchange.accounts.len() {
                        selected.push(Selected {
                            exchange_idx,
                            account_idx: Some(account_idx),
                        });
                    }
                }
            }
        } else {
            for name in names {
                let exchange_idx = self
                    .exchanges
                    .iter()
                    .position(|exchange| exchange.kind == name.venue)
                    .ok_or_else(|| {
                        ExchangeError::InvalidArgument(format!(
                            "exchange {} is not loaded",
                            name.venue
                        ))
                    })?;
                let exchange = &self.exchanges[exchange_idx];
                match &name.account {
                    Some(account) => {
                        let account_idx = exchange
                            .accounts
                            .iter()
                            .position(|candidate| candidate.name == *account)
                            .ok_or_else(|| {
                                ExchangeError::InvalidArgument(format!(
                                    "no account {account} configured on {}",
                                    name.venue
                                ))
                            })?;
                        push_unique(
                            Selected {
                                exchange_idx,
                                account_idx: Some(account_idx),
                            },
                            &mut selected,
                        );
                    }
                    None if exchange.accounts.is_empty() => push_unique(
                        Selected {
                            exchange_idx,
                            account_idx: None,
                        },
                        &mut selected,
                    ),
                    None => {
                        for account_idx in 0..exchange.accounts.len() {
                            push_unique(
                                Selected {
                                    exchange_idx,
                                    account_idx: Some(account_idx),
                                },
                                &mut selected,
                            );
                        }
                    }
                }
            }
        }

        if order == SelectionOrder::Initial {
            selected.sort_by_key(|entry| (entry.exchange_idx, entry.account_idx));
        }
        Ok(selected)
    }

    /// Selection de-duplicated by venue, for public data queried once per
    /// venue regardless of how many accounts exist. Entries are venue-level
    /// (no account attached).
    pub fn select_one_account(&self, names: &[ExchangeName]) -> Result<Vec<Selected>> {
        let mut selected = self.select(names, SelectionOrder::Selection, AccountFilter::Any)?;
        let mut seen = std::collections::BTreeSet::new();
        selected.retain(|entry| seen.insert(entry.exchange_idx));
        for entry in &mut selected {
            entry.account_idx = None;
        }
        Ok(selected)
    }

    pub fn exchange_of(&self, entry: Selected) -> &Exchange {
        &self.exchanges[entry.exchange_idx]
    }

    pub fn account_of(&self, entry: Selected) -> Option<&ExchangeAccount> {
        entry
            .account_idx
            .map(|account_idx| &self.exchanges[entry.exchange_idx].accounts[account_idx])
    }

    fn account_or_err(&self, entry: Selected) -> Result<&ExchangeAccount> {
        self.account_of(entry).ok_or_else(|| {
            ExchangeError::InvalidArgument(format!(
                "no private account selected on {}",
                self.exchange_of(entry).name()
            ))
        })
    }

    pub fn label_of(&self, entry: Selected) -> String {
        let exchange = self.exchange_of(entry);
        match self.account_of(entry) {
            Some(account) => format!("{}_{}", exchange.name(), account.name),
            None => exchange.name().to_string(),
        }
    }

    // ── Parallel fan-out ────────────────────────────────────────────

    /// Runs `operation` for every selected entry on the worker pool,
    /// preserving the selection order of the results.
    pub fn fan_out<R, F>(&self, selected: &[Selected], operation: F) -> Vec<Result<R>>
    where
        R: Send,
        F: Fn(&Exchange, Option<&ExchangeAccount>) -> Result<R> + Send + Sync,
    {
        self.pool.install(|| {
            selected
                .par_iter()
                .map(|entry| {
                    operation(self.exchange_of(*entry), self.account_of(*entry))
                })
                .collect()
        })
    }

    /// Pairs fan-out results with their labels; a venue failure becomes a
    /// default entry with the cause logged, except `InvalidArgument` which
    /// aborts the whole operation.
    fn harvest<R: Default>(
        &self,
        selected: &[Selected],
        results: Vec<Result<R>>,
    ) -> Result<PerExchange<R>> {
        let mut out = Vec::with_capacity(results.len());
        for (entry, result) in selected.iter().zip(results) {
            let label = self.label_of(*entry);
            match result {
                Ok(value) => out.push((label, value)),
                Err(err @ ExchangeError::InvalidArgument(_)) => return Err(err),
                Err(err) => {
                    error!("{label}: {err}");
                    out.push((label, R::default()));
                }
            }
        }
        Ok(out)
    }

    // ── Public data across venues ───────────────────────────────────

    pub fn health_check(&self, names: &[ExchangeName]) -> Result<PerExchange<bool>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| exchange.public.health_check());
        self.harvest(&selected, results)
    }

    pub fn tradable_currencies(
        &self,
        names: &[ExchangeName],
    ) -> Result<PerExchange<CurrencyExchangeSet>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            exchange.public.tradable_currencies()
        });
        self.harvest(&selected, results)
    }

    /// Markets per venue, optionally filtered to those containing the given
    /// currencies.
    pub fn markets(
        &self,
        cur1: Option<CurrencyCode>,
        cur2: Option<CurrencyCode>,
        names: &[ExchangeName],
    ) -> Result<PerExchange<MarketSet>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            let markets = exchange.public.tradable_markets()?;
            Ok(markets
                .into_iter()
                .filter(|market| {
                    cur1.is_none_or(|cur| market.contains(cur))
                        && cur2.is_none_or(|cur| market.contains(cur))
                })
                .collect())
        });
        self.harvest(&selected, results)
    }

    pub fn ticker_information(&self, names: &[ExchangeName]) -> Result<PerExchange<MarketPriceMap>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| exchange.public.all_prices());
        self.harvest(&selected, results)
    }

    pub fn order_books(
        &self,
        market: Market,
        names: &[ExchangeName],
        depth: usize,
    ) -> Result<PerExchange<Option<MarketOrderBook>>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            let markets = exchange.public.tradable_markets()?;
            if !markets.contains(&market) && !markets.contains(&market.reverse()) {
                return Ok(None);
            }
            exchange.public.order_book(market, depth).map(Some)
        });
        self.harvest(&selected, results)
    }

    pub fn all_order_books(
        &self,
        names: &[ExchangeName],
        depth: usize,
    ) -> Result<PerExchange<MarketOrderBookMap>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            exchange.public.all_order_books(depth)
        });
        self.harvest(&selected, results)
    }

    pub fn last_24h_volume(
        &self,
        market: Market,
        names: &[ExchangeName],
    ) -> Result<PerExchange<MonetaryAmount>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            exchange.public.last_24h_volume(market)
        });
        self.harvest(&selected, results)
    }

    pub fn last_trades(
        &self,
        market: Market,
        names: &[ExchangeName],
        nb_trades: usize,
    ) -> Result<PerExchange<Vec<PublicTrade>>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            exchange.public.last_trades(market, nb_trades)
        });
        self.harvest(&selected, results)
    }

    pub fn last_price(
        &self,
        market: Market,
        names: &[ExchangeName],
    ) -> Result<PerExchange<MonetaryAmount>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| exchange.public.last_price(market));
        self.harvest(&selected, results)
    }

    pub fn conversion_paths(
        &self,
        market: Market,
        names: &[ExchangeName],
    ) -> Result<PerExchange<Vec<Market>>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            find_markets_path(
                exchange.public.as_ref(),
                &self.ctx,
                market.base(),
                market.quote(),
                MarketPathMode::WithFiatConversionAtExtremity,
            )
        });
        self.harvest(&selected, results)
    }

    pub fn withdraw_fees(
        &self,
        cur: Option<CurrencyCode>,
        names: &[ExchangeName],
    ) -> Result<PerExchange<BTreeMap<CurrencyCode, MonetaryAmount>>> {
        let selected = self.select_one_account(names)?;
        let results = self.fan_out(&selected, |exchange, _| {
            let fees = exchange.public.withdrawal_fees()?;
            Ok(fees
                .into_iter()
                .filter(|(fee_cur, _)| cur.is_none_or(|cur| cur == *fee_cur))
                .collect())
        });
        self.harvest(&selected, results)
    }

    // ── Account-scoped operations ───────────────────────────────────

    /// Balance per selected account, with optional equivalent-currency
    /// valuation of each entry, plus totals per currency.
    pub fn balance(
        &self,
        names: &[ExchangeName],
        equi_cur: Option<CurrencyCode>,
    ) -> Result<(
        PerExchange<BTreeMap<CurrencyCode, BalanceEntry>>,
        BTreeMap<CurrencyCode, BalanceEntry>,
    )> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |exchange, account| {
            let account = account.ok_or_else(|| {
                ExchangeError::NotFound(format!("no account on {}", exchange.name()))
            })?;
            let balances: BalanceMap = account.api.account_balance()?;
            let mut entries = BTreeMap::new();
            for (cur, amount) in balances {
                let equivalent = match equi_cur {
                    Some(equi) => convert_at_average_price(
                        exchange.public.as_ref(),
                        &self.ctx,
                        &self.fiat_converter,
                        amount,
                        equi,
                    )
                    .unwrap_or_else(|err| {
                        debug!("no equivalent for {amount} on {}: {err}", exchange.name());
                        None
                    }),
                    None => None,
                };
                entries.insert(cur, BalanceEntry { amount, equivalent });
            }
            Ok(entries)
        });
        let per_exchange = self.harvest(&selected, results)?;

        let mut total: BTreeMap<CurrencyCode, BalanceEntry> = BTreeMap::new();
        for (_, entries) in &per_exchange {
            for (cur, entry) in entries {
                match total.entry(*cur) {
                    std::collections::btree_map::Entry::Vacant(vacant) => {
                        vacant.insert(*entry);
                    }
                    std::collections::btree_map::Entry::Occupied(mut occupied) => {
                        let merged = occupied.get_mut();
                        merged.amount = merged.amount.checked_add(entry.amount)?;
                        merged.equivalent = match (merged.equivalent, entry.equivalent) {
                            (Some(lhs), Some(rhs)) => Some(lhs.checked_add(rhs)?),
                            _ => None,
                        };
                    }
                }
            }
        }
        Ok((per_exchange, total))
    }

    /// Deposit wallet of the currency for every selected account; accounts
    /// that cannot serve an address are skipped with a warning.
    pub fn deposit_info(
        &self,
        cur: CurrencyCode,
        names: &[ExchangeName],
    ) -> Result<PerExchange<Wallet>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |exchange, account| {
            let account = account.ok_or_else(|| {
                ExchangeError::NotFound(format!("no account on {}", exchange.name()))
            })?;
            account.api.deposit_wallet(cur)
        });
        let mut out = Vec::new();
        for (entry, result) in selected.iter().zip(results) {
            let label = self.label_of(*entry);
            match result {
                Ok(wallet) => out.push((label, wallet)),
                Err(err @ ExchangeError::InvalidArgument(_)) => return Err(err),
                Err(err) => warn!("{label}: {err}"),
            }
        }
        Ok(out)
    }

    pub fn opened_orders(
        &self,
        filter: &OrdersConstraints,
        names: &[ExchangeName],
    ) -> Result<PerExchange<Vec<Order>>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |_, account| match account {
            Some(account) => account.api.opened_orders(filter),
            None => Ok(Vec::new()),
        });
        self.harvest(&selected, results)
    }

    pub fn closed_orders(
        &self,
        filter: &OrdersConstraints,
        names: &[ExchangeName],
    ) -> Result<PerExchange<Vec<Order>>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |_, account| match account {
            Some(account) => account.api.closed_orders(filter),
            None => Ok(Vec::new()),
        });
        self.harvest(&selected, results)
    }

    pub fn cancel_orders(
        &self,
        filter: &OrdersConstraints,
        names: &[ExchangeName],
    ) -> Result<PerExchange<usize>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |_, account| match account {
            Some(account) => account.api.cancel_orders(filter),
            None => Ok(0),
        });
        self.harvest(&selected, results)
    }

    pub fn recent_deposits(
        &self,
        filter: &TransferConstraints,
        names: &[ExchangeName],
    ) -> Result<PerExchange<Vec<Deposit>>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |_, account| match account {
            Some(account) => account.api.recent_deposits(filter),
            None => Ok(Vec::new()),
        });
        self.harvest(&selected, results)
    }

    pub fn recent_withdraws(
        &self,
        filter: &TransferConstraints,
        names: &[ExchangeName],
    ) -> Result<PerExchange<Vec<Withdraw>>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let results = self.fan_out(&selected, |_, account| match account {
            Some(account) => account.api.recent_withdraws(filter),
            None => Ok(Vec::new()),
        });
        self.harvest(&selected, results)
    }

    // ── Cache persistence ───────────────────────────────────────────

    /// Writes one snapshot file per adapter vault plus the fiat rate cache
    /// into `<data dir>/cache/`.
    pub fn update_file_caches(&self) -> Result<()> {
        let cache_dir = self.ctx.data_dir().join("cache");
        std::fs::create_dir_all(&cache_dir).map_err(|err| {
            ExchangeError::InvalidArgument(format!(
                "cannot create cache directory {}: {err}",
                cache_dir.display()
            ))
        })?;
        for exchange in &self.exchanges {
            let path = cache_dir.join(format!("{}.json", exchange.name()));
            let snapshot = exchange.public.dump_caches();
            write_json(&path, &snapshot)?;
            for account in &exchange.accounts {
                let path = cache_dir.join(format!("{}_{}.json", exchange.name(), account.name));
                write_json(&path, &account.api.dump_caches())?;
            }
        }
        write_json(
            &cache_dir.join("fiatrates.json"),
            &self.fiat_converter.dump_cache(),
        )?;
        debug!("flushed file caches to {}", cache_dir.display());
        Ok(())
    }

    /// Restores adapter caches written by [`Self::update_file_caches`].
    pub fn load_file_caches(&self) {
        let cache_dir = self.ctx.data_dir().join("cache");
        for exchange in &self.exchanges {
            if let Some(snapshot) = read_json(&cache_dir.join(format!("{}.json", exchange.name())))
            {
                exchange.public.load_caches(&snapshot);
            }
            for account in &exchange.accounts {
                let path = cache_dir.join(format!("{}_{}.json", exchange.name(), account.name));
                if let Some(snapshot) = read_json(&path) {
                    account.api.load_caches(&snapshot);
                }
            }
        }
        if let Some(snapshot) = read_json(&cache_dir.join("fiatrates.json")) {
            self.fiat_converter.load_cache(&snapshot);
        }
    }
}

fn write_json(path: &std::path::Path, value: &serde_json::Value) -> Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(value)?).map_err(|err| {
        ExchangeError::InvalidArgument(format!("cannot write {}: {err}", path.display()))
    })
}

fn read_json(path: &std::path::Path) -> Option<serde_json::Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}
