//! Rolling low/high tracking per side.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::ValidationError;
use crate::market::Outcome;

/// Price envelope observed for one side since its last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtremaState {
    /// Lowest price since reset.
    pub low: Decimal,
    /// Highest price since reset.
    pub high: Decimal,
    /// When the envelope was seeded.
    #[serde(with = "time::serde::rfc3339")]
    pub since: OffsetDateTime,
}

impl ExtremaState {
    fn seeded(price: Decimal, at: OffsetDateTime) -> Self {
        Self {
            low: price,
            high: price,
            since: at,
        }
    }

    /// Whether `price` lies inside the envelope.
    pub fn contains(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Check that a price is a valid probability quote: strictly inside (0, 1).
pub fn validate_price(side: Outcome, price: Decimal) -> Result<(), ValidationError> {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(ValidationError::PriceOutOfRange { side, price });
    }
    Ok(())
}

/// Per-side low/high tracker.
///
/// A reset side holds no envelope until the next observation seeds it
/// (`low == high == price`). Between resets `low` only falls and `high`
/// only rises.
#[derive(Debug, Clone, Default)]
pub struct ExtremumTracker {
    sides: [Option<ExtremaState>; 2],
}

impl ExtremumTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an observation into the side's envelope and return it.
    ///
    /// Prices outside (0, 1) are rejected without touching any state.
    pub fn update(
        &mut self,
        side: Outcome,
        price: Decimal,
        at: OffsetDateTime,
    ) -> Result<ExtremaState, ValidationError> {
        validate_price(side, price)?;

        let slot = &mut self.sides[side.index()];
        let state = match slot {
            Some(state) => {
                if price < state.low {
                    debug!(%side, low = %price, "new low");
                    state.low = price;
                }
                if price > state.high {
                    debug!(%side, high = %price, "new high");
                    state.high = price;
                }
                *state
            }
            None => {
                debug!(%side, %price, "envelope seeded");
                *slot.insert(ExtremaState::seeded(price, at))
            }
        };

        Ok(state)
    }

    /// Forget the side's envelope; the next observation seeds it.
    pub fn reset(&mut self, side: Outcome) {
        self.sides[side.index()] = None;
    }

    /// Reset both sides.
    pub fn reset_all(&mut self) {
        self.sides = [None, None];
    }

    /// Reset and immediately seed the side at `price`.
    pub fn seed(
        &mut self,
        side: Outcome,
        price: Decimal,
        at: OffsetDateTime,
    ) -> Result<ExtremaState, ValidationError> {
        validate_price(side, price)?;
        let state = ExtremaState::seeded(price, at);
        self.sides[side.index()] = Some(state);
        Ok(state)
    }

    /// Current envelope of a side, if seeded.
    pub fn get(&self, side: Outcome) -> Option<ExtremaState> {
        self.sides[side.index()]
    }
}
