use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::public::{compute_limit_order_price, find_markets_path, side_of};
use crate::api::MarketPathMode;
use crate::errors::{ExchangeError, Result};
use crate::model::currency::CurrencyCode;
use crate::model::market::Market;
use crate::model::monetary::MonetaryAmount;
use crate::model::orderbook::DEFAULT_DEPTH;
use crate::model::trade::{
    PriceStrategy, TimeoutAction, TradeInfo, TradeOptions, TradeSide, TradedAmounts,
};

use super::{
    AccountFilter, Exchange, ExchangeAccount, ExchangeName, Orchestrator, PerExchange, Selected,
    SelectionOrder,
};

pub type TradedAmountsPerExchange = PerExchange<TradedAmounts>;

/// Outcome of a dust sweep on one account.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct DustSweeperResult {
    pub trades: Vec<TradedAmounts>,
    pub final_balance: MonetaryAmount,
}

/// Bounded number of sell attempts when sweeping dust.
const DUST_SWEEPER_MAX_ITERATIONS: usize = 7;

/// Floor of the polling period inside a trade leg.
const MIN_POLL_PERIOD: Duration = Duration::from_millis(100);

struct TradeCandidate {
    selection_pos: usize,
    entry: Selected,
    available: MonetaryAmount,
    path: Vec<Market>,
}

impl Orchestrator {
    /// Multi-account trade of `from` into `to_cur`.
    ///
    /// Candidate accounts are those able to supply the source currency with
    /// a market path to the target; amounts are split greedily, largest
    /// balance first, and each account trades its share leg by leg along
    /// its path. Results come back in selection order, zeroed for accounts
    /// that traded nothing.
    pub fn trade(
        &self,
        from: MonetaryAmount,
        is_percentage: bool,
        to_cur: CurrencyCode,
        names: &[ExchangeName],
        options: &TradeOptions,
    ) -> Result<TradedAmountsPerExchange> {
        let from_cur = from.currency();
        if from_cur == to_cur {
            return Err(ExchangeError::InvalidArgument(format!(
                "cannot trade {from_cur} into itself"
            )));
        }
        if is_percentage && MonetaryAmount::from_int(100, from_cur) < from {
            return Err(ExchangeError::InvalidArgument(format!(
                "percentage trade of more than 100% ({from})"
            )));
        }
        let selected = self.select(
            names,
            SelectionOrder::Selection,
            AccountFilter::WithAccountWhenEmpty,
        )?;

        // Per-account availability and conversion path, queried in parallel.
        let probes = self.fan_out(&selected, |exchange, account| {
            let account = account.ok_or_else(|| {
                ExchangeError::NotFound(format!("no account on {}", exchange.name()))
            })?;
            let balance = account.api.account_balance()?;
            let mut available = balance
                .get(&from_cur)
                .copied()
                .unwrap_or_else(|| MonetaryAmount::zero(from_cur));
            if is_percentage && !available.is_zero() {
                available = available
                    .to_neutral()
                    .checked_mul(from.to_neutral())?
                    .checked_div(MonetaryAmount::from_int(100, CurrencyCode::neutral()))?
                    .with_currency(from_cur);
            }
            if available.is_zero() {
                return Ok((available, Vec::new()));
            }
            let path = find_markets_path(
                exchange.public.as_ref(),
                &self.ctx,
                from_cur,
                to_cur,
                MarketPathMode::Strict,
            )?;
            Ok((available, path))
        });

        let mut candidates = Vec::new();
        for (selection_pos, (entry, probe)) in selected.iter().zip(probes).enumerate() {
            match probe {
                Ok((available, path)) => {
                    if available.is_positive() && !path.is_empty() {
                        candidates.push(TradeCandidate {
                            selection_pos,
                            entry: *entry,
                            available,
                            path,
                        });
                    } else if available.is_positive() {
                        debug!(
                            "{}: no market path from {from_cur} to {to_cur}",
                            self.label_of(*entry)
                        );
                    }
                }
                Err(err @ ExchangeError::InvalidArgument(_)) => return Err(err),
                Err(err) => warn!("{}: {err}", self.label_of(*entry)),
            }
        }

        // Largest suppliers first.
        candidates.sort_by(|lhs, rhs| {
            rhs.available
                .partial_cmp(&lhs.available)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut target = if is_percentage {
            let mut sum = MonetaryAmount::zero(from_cur);
            for candidate in &candidates {
                sum = sum.checked_add(candidate.available)?;
            }
            sum
        } else {
            from
        };

        // Results keyed back to the original selection positions.
        let mut results: Vec<(String, TradedAmounts)> = selected
            .iter()
            .map(|entry| {
                (
                    self.label_of(*entry),
                    TradedAmounts::zero(from_cur, to_cur),
                )
            })
            .collect();

        for candidate in candidates {
            if !target.is_positive() {
                break;
            }
            let assigned = if candidate.available < target {
                candidate.available
            } else {
                target
            };
            let exchange = self.exchange_of(candidate.entry);
            let account = self.account_or_err(candidate.entry)?;
            match self.trade_along_path(exchange, account, assigned, &candidate.path, options) {
                Ok(traded) => {
                    target = target.checked_sub(traded.from)?;
                    results[candidate.selection_pos].1 = traded;
                }
                Err(err @ ExchangeError::InvalidArgument(_)) => return Err(err),
                Err(err) => warn!("{}: trade failed: {err}", self.label_of(candidate.entry)),
            }
        }
        Ok(results)
    }

    /// Sells `start_amount` into the first preferred payment currency
    /// reachable on the selected accounts.
    pub fn smart_sell(
        &self,
        start_amount: MonetaryAmount,
        is_percentage: bool,
        names: &[ExchangeName],
        options: &TradeOptions,
    ) -> Result<TradedAmountsPerExchange> {
        let from_cur = start_amount.currency();
        let selected = self.select(
            names,
            SelectionOrder::Selection,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        for preferred in self.preferred_currencies(&selected) {
            if preferred == from_cur {
                continue;
            }
            let reachable = selected.iter().any(|entry| {
                let exchange = self.exchange_of(*entry);
                find_markets_path(
                    exchange.public.as_ref(),
                    &self.ctx,
                    from_cur,
                    preferred,
                    MarketPathMode::Strict,
                )
                .map(|path| !path.is_empty())
                .unwrap_or(false)
            });
            if reachable {
                return self.trade(start_amount, is_percentage, preferred, names, options);
            }
        }
        Err(ExchangeError::NotFound(format!(
            "no preferred payment currency reachable from {from_cur}"
        )))
    }

    /// Buys until `end_amount` of the target currency is acquired, spending
    /// preferred payment currencies in priority order.
    pub fn smart_buy(
        &self,
        end_amount: MonetaryAmount,
        names: &[ExchangeName],
        options: &TradeOptions,
    ) -> Result<TradedAmountsPerExchange> {
        let to_cur = end_amount.currency();
        let selected = self.select(
            names,
            SelectionOrder::Selection,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let mut results: Vec<(String, TradedAmounts)> = selected
            .iter()
            .map(|entry| {
                (
                    self.label_of(*entry),
                    TradedAmounts::zero(CurrencyCode::neutral(), to_cur),
                )
            })
            .collect();
        let mut still_needed = end_amount;

        for (pos, entry) in selected.iter().enumerate() {
            if !still_needed.is_positive() {
                break;
            }
            let exchange = self.exchange_of(*entry);
            let Some(account) = self.account_of(*entry) else {
                continue;
            };
            let balance = match account.api.account_balance() {
                Ok(balance) => balance,
                Err(err) => {
                    warn!("{}: {err}", self.label_of(*entry));
                    continue;
                }
            };
            for preferred in self.preferred_currencies(std::slice::from_ref(entry)) {
                if !still_needed.is_positive() {
                    break;
                }
                if preferred == to_cur {
                    continue;
                }
                let Some(available) = balance.get(&preferred).copied() else {
                    continue;
                };
                if !available.is_positive() {
                    continue;
                }
                let path = match find_markets_path(
                    exchange.public.as_ref(),
                    &self.ctx,
                    preferred,
                    to_cur,
                    MarketPathMode::Strict,
                ) {
                    Ok(path) if !path.is_empty() => path,
                    _ => continue,
                };
                // Estimate how much of the payment currency the remaining
                // target is worth, and cap by the available balance.
                let needed_in_preferred = crate::api::public::convert_at_average_price(
                    exchange.public.as_ref(),
                    &self.ctx,
                    &self.fiat_converter,
                    still_needed,
                    preferred,
                )
                .ok()
                .flatten();
                let from = match needed_in_preferred {
                    Some(needed) if needed < available => needed,
                    _ => available,
                };
                match self.trade_along_path(exchange, account, from, &path, options) {
                    Ok(traded) => {
                        if traded.to.is_positive() {
                            still_needed = still_needed
                                .checked_sub(traded.to)
                                .unwrap_or_else(|_| MonetaryAmount::zero(to_cur));
                            results[pos].1 = traded;
                        }
                    }
                    Err(err @ ExchangeError::InvalidArgument(_)) => return Err(err),
                    Err(err) => warn!("{}: buy failed: {err}", self.label_of(*entry)),
                }
            }
        }
        Ok(results)
    }

    /// Repeatedly sells the residual balance of `cur` on each selected
    /// account until it is empty, no progress is made or the iteration cap
    /// is hit.
    pub fn dust_sweeper(
        &self,
        cur: CurrencyCode,
        names: &[ExchangeName],
    ) -> Result<PerExchange<DustSweeperResult>> {
        let selected = self.select(
            names,
            SelectionOrder::Initial,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        let options = TradeOptions {
            price_strategy: PriceStrategy::Taker,
            ..Default::default()
        };
        let results = self.fan_out(&selected, |exchange, account| {
            let account = account.ok_or_else(|| {
                ExchangeError::NotFound(format!("no account on {}", exchange.name()))
            })?;
            let mut result = DustSweeperResult {
                trades: Vec::new(),
                final_balance: MonetaryAmount::zero(cur),
            };
            for _ in 0..DUST_SWEEPER_MAX_ITERATIONS {
                let balance = account.api.account_balance()?;
                let amount = balance
                    .get(&cur)
                    .copied()
                    .unwrap_or_else(|| MonetaryAmount::zero(cur));
                result.final_balance = amount;
                if amount.is_zero() {
                    break;
                }
                let markets = exchange.public.tradable_markets()?;
                let Some(market) = markets.iter().find(|market| market.contains(cur)).copied()
                else {
                    break;
                };
                let traded =
                    self.trade_single_leg(exchange, account, amount, market, &options)?;
                if traded.from.is_zero() {
                    // No progress, give up rather than spin.
                    break;
                }
                result.trades.push(traded);
            }
            Ok(result)
        });
        self.harvest(&selected, results)
    }

    fn preferred_currencies(&self, selected: &[Selected]) -> Vec<CurrencyCode> {
        let mut out: Vec<CurrencyCode> = Vec::new();
        for entry in selected {
            let config = self.ctx.venue_config(self.exchange_of(*entry).name());
            for raw in &config.preferred_payment_currencies {
                if let Ok(cur) = CurrencyCode::new(raw) {
                    if !out.contains(&cur) {
                        out.push(cur);
                    }
                }
            }
        }
        out
    }

    /// Converts `from` leg by leg along the path on one account.
    fn trade_along_path(
        &self,
        exchange: &Exchange,
        account: &ExchangeAccount,
        from: MonetaryAmount,
        path: &[Market],
        options: &TradeOptions,
    ) -> Result<TradedAmounts> {
        let mut current = from;
        let mut first_leg_spent = MonetaryAmount::zero(from.currency());
        for (leg, market) in path.iter().enumerate() {
            let traded = self.trade_single_leg(exchange, account, current, *market, options)?;
            if leg == 0 {
                first_leg_spent = traded.from;
            }
            if traded.to.is_zero() {
                // A dead leg stops the chain; report what was spent so far.
                return Ok(TradedAmounts::new(
                    first_leg_spent,
                    MonetaryAmount::zero(
                        path.last()
                            .and_then(|market| market.opposite_of(current.currency()))
                            .unwrap_or(current.currency()),
                    ),
                ));
            }
            current = traded.to;
        }
        Ok(TradedAmounts::new(first_leg_spent, current))
    }

    /// One order lifecycle on a single market: price per strategy, place,
    /// poll, re-price makers, and apply the timeout action.
    pub(crate) fn trade_single_leg(
        &self,
        exchange: &Exchange,
        account: &ExchangeAccount,
        from: MonetaryAmount,
        market: Market,
        options: &TradeOptions,
    ) -> Result<TradedAmounts> {
        let side = side_of(from, market)?;
        let to_cur = market
            .opposite_of(from.currency())
            .unwrap_or(from.currency());
        let deadline = Instant::now() + options.max_trade_time;
        let poll_period = options
            .min_time_between_price_updates
            .min(Duration::from_secs(1))
            .max(MIN_POLL_PERIOD);

        let mut total = TradedAmounts::zero(from.currency(), to_cur);
        let mut remaining = from;
        let mut strategy = options.price_strategy;
        let mut timeout_matched = false;

        while remaining.is_positive() {
            if Instant::now() >= deadline {
                match options.timeout_action {
                    TimeoutAction::Match if !timeout_matched => {
                        timeout_matched = true;
                        strategy = PriceStrategy::Taker;
                    }
                    _ => break,
                }
            }
            let book = exchange.public.order_book(market, DEFAULT_DEPTH)?;
            let price = compute_limit_order_price(&book, remaining, strategy)?;
            let volume = match side {
                TradeSide::Buy => remaining
                    .checked_div(price)?
                    .with_currency(market.base()),
                TradeSide::Sell => remaining,
            };
            if volume.is_zero() {
                break;
            }
            let info = TradeInfo {
                market,
                side,
                options: TradeOptions {
                    price_strategy: strategy,
                    ..options.clone()
                },
            };
            let placed = account
                .api
                .place_order(remaining, volume, price, &info)?;

            if placed.is_simulation {
                // Theoretical fill at the computed price.
                let to = match side {
                    TradeSide::Buy => volume,
                    TradeSide::Sell => remaining.to_neutral().checked_mul(price)?,
                };
                total.from = total.from.checked_add(remaining)?;
                total.to = total.to.checked_add(to)?;
                return Ok(total);
            }

            let mut order_traded = placed.traded;
            if !placed.is_closed {
                let mut last_reprice = Instant::now();
                loop {
                    if Instant::now() >= deadline {
                        let cancelled = account.api.cancel_order(&placed.order_id, &info)?;
                        order_traded = cancelled.traded;
                        match options.timeout_action {
                            TimeoutAction::Cancel => {
                                info!(
                                    "trade timeout on {market}, cancelling the rest ({remaining} left)"
                                );
                                total.from = total.from.checked_add(order_traded.from)?;
                                total.to = total.to.checked_add(order_traded.to)?;
                                return Ok(total);
                            }
                            TimeoutAction::Match => {
                                if timeout_matched {
                                    total.from = total.from.checked_add(order_traded.from)?;
                                    total.to = total.to.checked_add(order_traded.to)?;
                                    return Ok(total);
                                }
                                info!("trade timeout on {market}, matching the rest at market");
                                timeout_matched = true;
                                strategy = PriceStrategy::Taker;
                                break;
                            }
                        }
                    }
                    std::thread::sleep(poll_period);
                    let queried = account.api.query_order_info(&placed.order_id, &info)?;
                    order_traded = queried.traded;
                    if queried.is_closed {
                        break;
                    }
                    if matches!(strategy, PriceStrategy::Maker | PriceStrategy::Nibble)
                        && last_reprice.elapsed() >= options.min_time_between_price_updates
                    {
                        let fresh_book = exchange.public.order_book(market, DEFAULT_DEPTH)?;
                        let fresh_price =
                            compute_limit_order_price(&fresh_book, remaining, strategy)?;
                        if fresh_price != price {
                            debug!("re-pricing {market} order from {price} to {fresh_price}");
                            let cancelled =
                                account.api.cancel_order(&placed.order_id, &info)?;
                            order_traded = cancelled.traded;
                            break;
                        }
                        last_reprice = Instant::now();
                    }
                }
            }

            total.from = total.from.checked_add(order_traded.from)?;
            total.to = total.to.checked_add(order_traded.to)?;
            remaining = remaining
                .checked_sub(order_traded.from)
                .unwrap_or_else(|_| MonetaryAmount::zero(from.currency()));
            if placed.is_closed && order_traded.from.is_zero() {
                // Closed without matching anything: nothing more to do.
                break;
            }
        }
        Ok(total)
    }
}
