//! Position state and trade records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use time::OffsetDateTime;

use crate::market::Outcome;

/// A single price observation for one side of the attached market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceObservation {
    /// Side the price belongs to.
    pub side: Outcome,
    /// Quoted price in (0, 1).
    pub price: Decimal,
    /// When the price was observed.
    pub timestamp: OffsetDateTime,
}

/// An open position on exactly one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Held side.
    pub side: Outcome,
    /// Confirmed fill price of the entry.
    pub entry_price: Decimal,
    /// USDC spent on entry (`entry_price * shares`).
    pub size_usdc: Decimal,
    /// Shares held.
    pub shares: Decimal,
    /// Entry fill time.
    #[serde(with = "time::serde::rfc3339")]
    pub entry_time: OffsetDateTime,
    /// Market instance the position was opened in.
    pub market_slug: String,
}

impl OpenPosition {
    /// Mark-to-market P&L at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.shares
    }
}

/// Current position. Holding both sides is unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PositionState {
    /// No open position.
    #[default]
    Flat,
    /// Holding one side.
    Holding(OpenPosition),
}

impl PositionState {
    /// The open position, if any.
    pub fn open(&self) -> Option<&OpenPosition> {
        match self {
            PositionState::Flat => None,
            PositionState::Holding(position) => Some(position),
        }
    }

    /// Held side, if any.
    pub fn side(&self) -> Option<Outcome> {
        self.open().map(|p| p.side)
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CloseReason {
    /// Price fell far enough from its high to flip.
    Reversal,
    /// Market instance ended with the position open.
    Boundary,
}

/// Immutable record of a closed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: Outcome,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size_usdc: Decimal,
    pub shares: Decimal,
    /// `(exit_price - entry_price) * shares`.
    pub realized_pnl: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub entry_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub exit_time: OffsetDateTime,
    pub market_slug: String,
    pub reason: CloseReason,
}

impl TradeRecord {
    /// Close `position` at `exit_price`.
    pub fn close(
        position: &OpenPosition,
        exit_price: Decimal,
        exit_time: OffsetDateTime,
        reason: CloseReason,
    ) -> Self {
        Self {
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size_usdc: position.size_usdc,
            shares: position.shares,
            realized_pnl: position.pnl_at(exit_price),
            entry_time: position.entry_time,
            exit_time,
            market_slug: position.market_slug.clone(),
            reason,
        }
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}
