//! Price feeds.
//!
//! A feed produces raw `(token_id, price, timestamp)` quotes for the attached
//! market; resolving tokens to sides is the engine's job.

pub mod clob;
pub mod replay;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::MarketError;
use crate::market::MarketBinding;

pub use clob::ClobPriceFeed;
pub use replay::{ReplayEvent, ReplayFeed};

/// One raw price quote for a token.
///
/// `price` drives the signal rules. `bid`, when the feed knows it, is what a
/// sell of the token would receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub token_id: String,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl Quote {
    pub fn new(token_id: impl Into<String>, price: Decimal, at: OffsetDateTime) -> Self {
        Self {
            token_id: token_id.into(),
            price,
            bid: None,
            at,
        }
    }

    pub fn with_bid(mut self, bid: Decimal) -> Self {
        self.bid = Some(bid);
        self
    }
}

/// Source of quotes for the tokens of a market.
#[async_trait]
pub trait PriceFeed: Send {
    /// Current quotes for `binding`'s tokens. Missing tokens are simply absent.
    async fn poll(&mut self, binding: &MarketBinding) -> Result<Vec<Quote>, MarketError>;

    /// True once the feed can produce nothing more. Live feeds never end.
    fn is_exhausted(&self) -> bool {
        false
    }
}
