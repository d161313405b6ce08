use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Uniform command line over several spot exchanges: market data, balances,
/// smart multi-venue trades and cross-venue withdrawals.
#[derive(Parser)]
#[command(name = "crosscex", version, about)]
pub struct Cli {
    /// Directory holding configuration, secrets and cache files
    #[arg(long, env = "CROSSCEX_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Comma-separated venue[_account] references; empty means all
    #[arg(long, short = 'e', value_delimiter = ',')]
    pub exchanges: Vec<String>,

    /// Output mode
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputMode,

    /// Register in-process metrics (counters and histograms)
    #[arg(long)]
    pub monitoring: bool,

    /// Size of the venue worker pool
    #[arg(long, default_value = "8")]
    pub threads: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum OutputMode {
    Table,
    Json,
    Off,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check that the selected venues answer
    HealthCheck,

    /// List tradable currencies per venue
    Currencies,

    /// List markets per venue, optionally filtered by currency
    Markets {
        cur1: Option<String>,
        cur2: Option<String>,
    },

    /// Approximated prices of every market per venue
    Ticker,

    /// Order book of a market (e.g. BTC-EUR)
    Orderbook {
        market: String,

        /// Number of levels per side
        #[arg(long, default_value = "10")]
        depth: usize,
    },

    /// Total traded volume over the last 24 hours
    VolumeDay { market: String },

    /// Most recent trades of a market, oldest first
    LastTrades {
        market: String,

        #[arg(long, short = 'n', default_value = "100")]
        nb: usize,
    },

    /// Last price of a market per venue
    Price { market: String },

    /// Shortest conversion path between two currencies per venue
    Conversion { from: String, to: String },

    /// Withdrawal fees per venue
    WithdrawFees { cur: Option<String> },

    /// Balance per account, with optional equivalent currency valuation
    Balance {
        /// Express each entry in this currency as well
        #[arg(long)]
        equi: Option<String>,
    },

    /// Deposit address of a currency on each account
    DepositInfo { cur: String },

    /// Currently opened orders
    OrdersOpened {
        #[arg(long)]
        cur1: Option<String>,
        #[arg(long)]
        cur2: Option<String>,
    },

    /// Cancel opened orders matching the filter
    OrdersCancel {
        #[arg(long)]
        cur1: Option<String>,
        #[arg(long)]
        cur2: Option<String>,
    },

    /// Recent deposits
    DepositsRecent { cur: Option<String> },

    /// Recent withdrawals
    WithdrawsRecent { cur: Option<String> },

    /// Trade an amount into another currency across accounts,
    /// e.g. `trade "0.5 BTC" EUR`
    Trade {
        /// Amount with its currency, or a percentage with `--pct`
        amount: String,
        to_cur: String,

        #[command(flatten)]
        options: TradeArgs,
    },

    /// Buy a target amount, spending preferred payment currencies,
    /// e.g. `buy "1 ETH"`
    Buy {
        amount: String,

        #[command(flatten)]
        options: TradeArgs,
    },

    /// Sell an amount (or percentage of holdings) into the first reachable
    /// preferred payment currency
    Sell {
        amount: String,

        #[command(flatten)]
        options: TradeArgs,
    },

    /// Withdraw an amount from one account to another venue,
    /// e.g. `withdraw-apply "100 XRP" kraken binance`
    WithdrawApply {
        amount: String,
        from_exchange: String,
        to_exchange: String,

        /// Treat the amount as a percentage of the available balance
        #[arg(long)]
        pct: bool,

        /// Return as soon as the source confirms the send
        #[arg(long = "async")]
        asynchronous: bool,

        /// Give up after this much time (e.g. "30min")
        #[arg(long, default_value = "30min")]
        timeout: String,
    },

    /// Repeatedly sell residual dust of a currency until exhausted
    DustSweeper { cur: String },
}

#[derive(Clone, clap::Args)]
pub struct TradeArgs {
    /// Treat the amount as a percentage of the available balance
    #[arg(long)]
    pub pct: bool,

    /// Price strategy relative to top of book
    #[arg(long, default_value = "maker")]
    pub strategy: StrategyArg,

    /// Give up on the trade after this much time (e.g. "30s", "2min")
    #[arg(long, default_value = "30s")]
    pub timeout: String,

    /// Minimum delay between two maker price updates
    #[arg(long, default_value = "5s")]
    pub update_price: String,

    /// Place a taker order with the rest on timeout instead of cancelling
    #[arg(long)]
    pub match_on_timeout: bool,

    /// Simulate instead of placing real orders
    #[arg(long)]
    pub sim: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum StrategyArg {
    Maker,
    Nibble,
    Taker,
}
