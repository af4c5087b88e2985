//! Order book snapshot types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total size available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// L2 snapshot of one token's book.
#[derive(Debug, Clone)]
pub struct OutcomeBook {
    /// Token ID this book represents.
    pub token_id: String,
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
    /// When the snapshot was taken.
    pub updated_at: OffsetDateTime,
}

impl OutcomeBook {
    /// Build a snapshot from unsorted levels; empty levels are dropped.
    pub fn from_levels(
        token_id: impl Into<String>,
        bids: impl IntoIterator<Item = PriceLevel>,
        asks: impl IntoIterator<Item = PriceLevel>,
        updated_at: OffsetDateTime,
    ) -> Self {
        let live = |l: &PriceLevel| l.size > Decimal::ZERO;
        let mut bids: Vec<_> = bids.into_iter().filter(live).collect();
        let mut asks: Vec<_> = asks.into_iter().filter(live).collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        Self {
            token_id: token_id.into(),
            bids,
            asks,
            updated_at,
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Lowest ask: the price a buyer pays right now.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Check if the book is inverted (best_ask < best_bid).
    pub fn is_inverted(&self) -> bool {
        matches!(self.spread(), Some(spread) if spread < Decimal::ZERO)
    }
}
