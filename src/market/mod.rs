//! Market module for BTC 15-minute prediction markets.
//!
//! This module handles:
//! - Market types and the token-to-side binding
//! - Market discovery (finding the active window)
//! - Polymarket CLOB client

pub mod client;
pub mod discovery;
pub mod types;

pub use client::PolymarketClient;
pub use discovery::{discover_active_market, fetch_market_from_slug, next_slug, slug_for};
pub use types::{Market, MarketBinding, MarketData, Outcome};
