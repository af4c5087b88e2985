//! Orchestration around the engine.
//!
//! This module handles:
//! - The single-writer trader task that executes intents
//! - Feed polling and market lifecycle on a fixed cadence
//! - The ordered event queue between them

pub mod scheduler;
pub mod trader;

use crate::feed::Quote;
use crate::market::MarketBinding;

pub use scheduler::{Scheduler, StopReason};
pub use trader::Trader;

/// Everything the trader reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraderEvent {
    Quote(Quote),
    /// A new market instance became active.
    Attach(MarketBinding),
    /// The current market instance is closing.
    Detach,
}
