//! BTC 15-minute Polymarket reversal ("flip") bot.
//!
//! The bot holds at most one side of the current "BTC up or down" market.
//! It enters a side when its price rebounds off the running low (or drops
//! to an absolute threshold), and when the held side falls back from its
//! running high it sells and buys the opposite side:
//!
//! ```text
//! UP  low 0.45 → 0.475 (+5.6%)     ENTER UP @ 0.475
//! UP  high 0.70 → 0.665 (−5%)      EXIT UP @ 0.665, BUY DOWN @ 0.335
//! ```
//!
//! A new market instance starts every 15 minutes. Extrema reset at every
//! boundary; realized P&L accumulates in an append-only ledger.
//!
//! # Modules
//!
//! - [`engine`]: Extremum tracking, signals, position state
//! - [`ledger`]: Trade history and persisted state
//! - [`runtime`]: Trader task and feed scheduler
//! - [`feed`]: Price feeds (CLOB polling, replay)
//! - [`trading`]: Order requests and order sinks
//! - [`market`]: Market discovery and Polymarket client
//! - [`orderbook`]: Order book snapshots
//! - [`signing`]: Wallet signing for authenticated requests
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`api`]: HTTP API for health, status and metrics
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Shutdown handling and small helpers

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod market;
pub mod metrics;
pub mod orderbook;
pub mod runtime;
pub mod signing;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
