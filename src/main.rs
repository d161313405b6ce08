use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crosscex::api::public::DEFAULT_NB_LAST_TRADES;
use crosscex::context::AppContext;
use crosscex::durations::parse_duration;
use crosscex::errors::Result;
use crosscex::metrics::MetricsSink;
use crosscex::model::currency::CurrencyCode;
use crosscex::model::market::Market;
use crosscex::model::monetary::MonetaryAmount;
use crosscex::model::trade::{
    OrdersConstraints, PriceStrategy, TimeoutAction, TradeOptions, TransferConstraints,
};
use crosscex::orchestrator::{
    ExchangeName, Orchestrator, WithdrawMode, WithdrawOptions,
};
use crosscex::setup::bootstrap;

mod cli;
mod output;

use cli::{Cli, Command, OutputMode, StrategyArg, TradeArgs};
use output::print_results;

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| dirs::data_dir().map(|dir| dir.join("crosscex")))
        .unwrap_or_else(|| PathBuf::from("."));
    let metrics = if cli.monitoring {
        Some(MetricsSink::new()?)
    } else {
        None
    };
    let ctx = Arc::new(AppContext::load(data_dir, metrics)?);
    let orchestrator = bootstrap(ctx, cli.threads)?;
    orchestrator.load_file_caches();

    let names = parse_names(&cli.exchanges)?;
    let outcome = dispatch(&orchestrator, &cli, &names);

    // Flush caches whatever the command outcome.
    if let Err(err) = orchestrator.update_file_caches() {
        tracing::warn!("could not flush file caches: {err}");
    }
    outcome
}

fn parse_names(raw: &[String]) -> Result<Vec<ExchangeName>> {
    raw.iter()
        .filter(|name| !name.trim().is_empty())
        .map(|name| name.parse())
        .collect()
}

fn parse_cur(raw: &str) -> Result<CurrencyCode> {
    CurrencyCode::new(raw)
}

fn parse_market(raw: &str) -> Result<Market> {
    raw.parse()
}

fn trade_options(args: &TradeArgs) -> Result<TradeOptions> {
    Ok(TradeOptions {
        price_strategy: match args.strategy {
            StrategyArg::Maker => PriceStrategy::Maker,
            StrategyArg::Nibble => PriceStrategy::Nibble,
            StrategyArg::Taker => PriceStrategy::Taker,
        },
        max_trade_time: parse_duration(&args.timeout)?,
        min_time_between_price_updates: parse_duration(&args.update_price)?,
        timeout_action: if args.match_on_timeout {
            TimeoutAction::Match
        } else {
            TimeoutAction::Cancel
        },
        is_simulation: args.sim,
    })
}

fn orders_constraints(cur1: &Option<String>, cur2: &Option<String>) -> Result<OrdersConstraints> {
    Ok(OrdersConstraints {
        cur1: cur1.as_deref().map(parse_cur).transpose()?,
        cur2: cur2.as_deref().map(parse_cur).transpose()?,
        ..Default::default()
    })
}

fn dispatch(orchestrator: &Orchestrator, cli: &Cli, names: &[ExchangeName]) -> Result<()> {
    let mode = cli.output;
    match &cli.command {
        Command::HealthCheck => {
            let results = orchestrator.health_check(names)?;
            print_results(
                mode,
                &["exchange", "health"],
                results
                    .iter()
                    .map(|(label, healthy)| {
                        vec![label.clone(), if *healthy { "OK" } else { "KO" }.into()]
                    })
                    .collect(),
                &results,
            );
        }
        Command::Currencies => {
            let results = orchestrator.tradable_currencies(names)?;
            print_results(
                mode,
                &["exchange", "currency", "deposit", "withdraw"],
                results
                    .iter()
                    .flat_map(|(label, currencies)| {
                        currencies.iter().map(move |currency| {
                            vec![
                                label.clone(),
                                currency.standard_code.to_string(),
                                yes_no(currency.can_deposit),
                                yes_no(currency.can_withdraw),
                            ]
                        })
                    })
                    .collect(),
                &results,
            );
        }
        Command::Markets { cur1, cur2 } => {
            let cur1 = cur1.as_deref().map(parse_cur).transpose()?;
            let cur2 = cur2.as_deref().map(parse_cur).transpose()?;
            let results = orchestrator.markets(cur1, cur2, names)?;
            print_results(
                mode,
                &["exchange", "market"],
                results
                    .iter()
                    .flat_map(|(label, markets)| {
                        markets
                            .iter()
                            .map(move |market| vec![label.clone(), market.to_string()])
                    })
                    .collect(),
                &results,
            );
        }
        Command::Ticker => {
            let results = orchestrator.ticker_information(names)?;
            print_results(
                mode,
                &["exchange", "market", "price"],
                results
                    .iter()
                    .flat_map(|(label, prices)| {
                        let mut rows: Vec<(String, String)> = prices
                            .iter()
                            .map(|(market, price)| (market.to_string(), price.to_string()))
                            .collect();
                        rows.sort();
                        rows.into_iter()
                            .map(move |(market, price)| vec![label.clone(), market, price])
                    })
                    .collect(),
                &results
                    .iter()
                    .map(|(label, prices)| {
                        (
                            label.clone(),
                            prices
                                .iter()
                                .map(|(market, price)| (market.to_string(), *price))
                                .collect::<std::collections::BTreeMap<_, _>>(),
                        )
                    })
                    .collect::<Vec<_>>(),
            );
        }
        Command::Orderbook { market, depth } => {
            let market = parse_market(market)?;
            let results = orchestrator.order_books(market, names, *depth)?;
            print_results(
                mode,
                &["exchange", "side", "price", "amount"],
                results
                    .iter()
                    .flat_map(|(label, book)| {
                        book.iter()
                            .flat_map(|book| {
                                book.asks()
                                    .iter()
                                    .map(|line| ("ask", line))
                                    .chain(book.bids().iter().map(|line| ("bid", line)))
                                    .collect::<Vec<_>>()
                            })
                            .map(move |(side, line)| {
                                vec![
                                    label.clone(),
                                    side.into(),
                                    line.price.to_string(),
                                    line.amount.to_string(),
                                ]
                            })
                    })
                    .collect(),
                &results,
            );
        }
        Command::VolumeDay { market } => {
            let market = parse_market(market)?;
            let results = orchestrator.last_24h_volume(market, names)?;
            print_amount_per_exchange(mode, "volume", &results);
        }
        Command::LastTrades { market, nb } => {
            let market = parse_market(market)?;
            let nb = if *nb == 0 { DEFAULT_NB_LAST_TRADES } else { *nb };
            let results = orchestrator.last_trades(market, names, nb)?;
            print_results(
                mode,
                &["exchange", "time", "side", "price", "amount"],
                results
                    .iter()
                    .flat_map(|(label, trades)| {
                        trades.iter().map(move |trade| {
                            vec![
                                label.clone(),
                                trade.time.to_rfc3339(),
                                trade.side.to_string(),
                                trade.price.to_string(),
                                trade.amount.to_string(),
                            ]
                        })
                    })
                    .collect(),
                &results,
            );
        }
        Command::Price { market } => {
            let market = parse_market(market)?;
            let results = orchestrator.last_price(market, names)?;
            print_amount_per_exchange(mode, "price", &results);
        }
        Command::Conversion { from, to } => {
            let market = Market::new(parse_cur(from)?, parse_cur(to)?);
            let results = orchestrator.conversion_paths(market, names)?;
            print_results(
                mode,
                &["exchange", "path"],
                results
                    .iter()
                    .map(|(label, path)| {
                        let rendered = if path.is_empty() {
                            "--".to_string()
                        } else {
                            path.iter()
                                .map(|market| market.to_string())
                                .collect::<Vec<_>>()
                                .join(",")
                        };
                        vec![label.clone(), rendered]
                    })
                    .collect(),
                &results,
            );
        }
        Command::WithdrawFees { cur } => {
            let cur = cur.as_deref().map(parse_cur).transpose()?;
            let results = orchestrator.withdraw_fees(cur, names)?;
            print_results(
                mode,
                &["exchange", "currency", "fee"],
                results
                    .iter()
                    .flat_map(|(label, fees)| {
                        fees.iter().map(move |(cur, fee)| {
                            vec![label.clone(), cur.to_string(), fee.to_string()]
                        })
                    })
                    .collect(),
                &results,
            );
        }
        Command::Balance { equi } => {
            let equi = equi.as_deref().map(parse_cur).transpose()?;
            let (per_exchange, total) = orchestrator.balance(names, equi)?;
            let mut rows: Vec<Vec<String>> = per_exchange
                .iter()
                .flat_map(|(label, entries)| {
                    entries.iter().map(move |(cur, entry)| {
                        vec![
                            label.clone(),
                            cur.to_string(),
                            entry.amount.to_string(),
                            entry
                                .equivalent
                                .map(|equivalent| equivalent.to_string())
                                .unwrap_or_default(),
                        ]
                    })
                })
                .collect();
            for (cur, entry) in &total {
                rows.push(vec![
                    "total".into(),
                    cur.to_string(),
                    entry.amount.to_string(),
                    entry
                        .equivalent
                        .map(|equivalent| equivalent.to_string())
                        .unwrap_or_default(),
                ]);
            }
            print_results(
                mode,
                &["exchange", "currency", "amount", "equivalent"],
                rows,
                &(per_exchange, total),
            );
        }
        Command::DepositInfo { cur } => {
            let cur = parse_cur(cur)?;
            let results = orchestrator.deposit_info(cur, names)?;
            print_results(
                mode,
                &["exchange", "address", "tag"],
                results
                    .iter()
                    .map(|(label, wallet)| {
                        vec![
                            label.clone(),
                            wallet.address.clone(),
                            wallet.tag.clone().unwrap_or_default(),
                        ]
                    })
                    .collect(),
                &results,
            );
        }
        Command::OrdersOpened { cur1, cur2 } => {
            let filter = orders_constraints(cur1, cur2)?;
            let results = orchestrator.opened_orders(&filter, names)?;
            print_orders(mode, &results);
        }
        Command::OrdersCancel { cur1, cur2 } => {
            let filter = orders_constraints(cur1, cur2)?;
            let results = orchestrator.cancel_orders(&filter, names)?;
            print_results(
                mode,
                &["exchange", "cancelled"],
                results
                    .iter()
                    .map(|(label, nb)| vec![label.clone(), nb.to_string()])
                    .collect(),
                &results,
            );
        }
        Command::DepositsRecent { cur } => {
            let filter = transfer_constraints(cur)?;
            let results = orchestrator.recent_deposits(&filter, names)?;
            print_results(
                mode,
                &["exchange", "time", "amount", "settled"],
                results
                    .iter()
                    .flat_map(|(label, deposits)| {
                        deposits.iter().map(move |deposit| {
                            vec![
                                label.clone(),
                                deposit.time.to_rfc3339(),
                                deposit.amount.to_string(),
                                yes_no(deposit.is_settled),
                            ]
                        })
                    })
                    .collect(),
                &results,
            );
        }
        Command::WithdrawsRecent { cur } => {
            let filter = transfer_constraints(cur)?;
            let results = orchestrator.recent_withdraws(&filter, names)?;
            print_results(
                mode,
                &["exchange", "time", "amount", "fee", "sent"],
                results
                    .iter()
                    .flat_map(|(label, withdraws)| {
                        withdraws.iter().map(move |withdraw| {
                            vec![
                                label.clone(),
                                withdraw.time.to_rfc3339(),
                                withdraw.amount.to_string(),
                                withdraw.fee.to_string(),
                                yes_no(withdraw.is_sent),
                            ]
                        })
                    })
                    .collect(),
                &results,
            );
        }
        Command::Trade {
            amount,
            to_cur,
            options,
        } => {
            let amount = MonetaryAmount::parse(amount)?;
            let to_cur = parse_cur(to_cur)?;
            let trade_options = trade_options(options)?;
            let results =
                orchestrator.trade(amount, options.pct, to_cur, names, &trade_options)?;
            print_traded(mode, &results);
        }
        Command::Buy { amount, options } => {
            let amount = MonetaryAmount::parse(amount)?;
            let trade_options = trade_options(options)?;
            let results = orchestrator.smart_buy(amount, names, &trade_options)?;
            print_traded(mode, &results);
        }
        Command::Sell { amount, options } => {
            let amount = MonetaryAmount::parse(amount)?;
            let trade_options = trade_options(options)?;
            let results =
                orchestrator.smart_sell(amount, options.pct, names, &trade_options)?;
            print_traded(mode, &results);
        }
        Command::WithdrawApply {
            amount,
            from_exchange,
            to_exchange,
            pct,
            asynchronous,
            timeout,
        } => {
            let amount = MonetaryAmount::parse(amount)?;
            let from_name: ExchangeName = from_exchange.parse()?;
            let to_name: ExchangeName = to_exchange.parse()?;
            let options = WithdrawOptions {
                mode: if *asynchronous {
                    WithdrawMode::Asynchronous
                } else {
                    WithdrawMode::Synchronous
                },
                timeout: parse_duration(timeout)?,
                ..Default::default()
            };
            let delivered =
                orchestrator.withdraw(amount, *pct, &from_name, &to_name, &options)?;
            print_results(
                mode,
                &["initiated", "sent", "received"],
                vec![vec![
                    yes_no(delivered.initiated),
                    yes_no(delivered.sent),
                    delivered
                        .received
                        .map(|amount| amount.to_string())
                        .unwrap_or_default(),
                ]],
                &[(
                    "withdraw".to_string(),
                    (
                        delivered.initiated,
                        delivered.sent,
                        delivered.received,
                    ),
                )],
            );
        }
        Command::DustSweeper { cur } => {
            let cur = parse_cur(cur)?;
            let results = orchestrator.dust_sweeper(cur, names)?;
            print_results(
                mode,
                &["exchange", "trades", "final balance"],
                results
                    .iter()
                    .map(|(label, result)| {
                        vec![
                            label.clone(),
                            result.trades.len().to_string(),
                            result.final_balance.to_string(),
                        ]
                    })
                    .collect(),
                &results
                    .iter()
                    .map(|(label, result)| {
                        (label.clone(), (&result.trades, result.final_balance))
                    })
                    .collect::<Vec<_>>(),
            );
        }
    }
    Ok(())
}

fn transfer_constraints(cur: &Option<String>) -> Result<TransferConstraints> {
    Ok(TransferConstraints {
        currency: cur.as_deref().map(parse_cur).transpose()?,
        ..Default::default()
    })
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn print_traded(mode: OutputMode, results: &[(String, crosscex::model::trade::TradedAmounts)]) {
    print_results(
        mode,
        &["exchange", "from", "to"],
        results
            .iter()
            .map(|(label, traded)| {
                vec![
                    label.clone(),
                    traded.from.to_string(),
                    traded.to.to_string(),
                ]
            })
            .collect(),
        &results,
    );
}

fn print_amount_per_exchange(
    mode: OutputMode,
    what: &str,
    results: &[(String, MonetaryAmount)],
) {
    print_results(
        mode,
        &["exchange", what],
        results
            .iter()
            .map(|(label, amount)| vec![label.clone(), amount.to_string()])
            .collect(),
        &results,
    );
}

fn print_orders(mode: OutputMode, results: &[(String, Vec<crosscex::model::trade::Order>)]) {
    print_results(
        mode,
        &["exchange", "id", "market", "side", "price", "matched", "remaining"],
        results
            .iter()
            .flat_map(|(label, orders)| {
                orders.iter().map(move |order| {
                    vec![
                        label.clone(),
                        order.id.clone(),
                        order.market.to_string(),
                        order.side.to_string(),
                        order.price.to_string(),
                        order.matched_volume.to_string(),
                        order.remaining_volume.to_string(),
                    ]
                })
            })
            .collect(),
        &results,
    );
}
