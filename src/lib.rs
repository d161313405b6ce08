//! Multi-venue spot exchange client.
//!
//! A uniform interface over several cryptocurrency exchanges (Binance,
//! Bithumb, Huobi, Kraken, KuCoin, Upbit) with an orchestration layer that
//! splits, schedules and aggregates operations across venues and accounts:
//! tickers, order books, balances, smart multi-venue trades and
//! cross-venue withdrawals.
//!
//! The building blocks are usable on their own:
//! - [`model::MonetaryAmount`], the fixed-point currency-tagged substrate;
//! - [`net`], the HTTP client stack (URL picking, spacing, retry, flat
//!   key-value canonicalization for signing);
//! - [`cache`], TTL'd single-flight memoization grouped in vaults;
//! - [`api`], the venue capability traits and the conversion path engine;
//! - [`venues`], one adapter per supported venue;
//! - [`orchestrator`], the cross-venue coordination layer.

pub mod api;
pub mod cache;
pub mod context;
pub mod durations;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod net;
pub mod orchestrator;
pub mod setup;
pub mod venues;

pub use errors::{ExchangeError, Result};
