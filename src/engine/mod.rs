//! Position/state engine.
//!
//! This module handles:
//! - Rolling low/high tracking per side
//! - Entry, exit and flip signals with pending-intent locks
//! - Position state, trade records and market boundaries

pub mod extrema;
pub mod signal;
pub mod state;

pub use extrema::{validate_price, ExtremaState, ExtremumTracker};
pub use signal::{EngineParams, EntryTrigger, Intent, SignalEngine};
pub use state::{CloseReason, OpenPosition, PositionState, PriceObservation, TradeRecord};
