//! Order requests, fills and exchange order states.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ExecutionError;
use crate::market::Outcome;

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum OrderAction {
    Buy,
    Sell,
}

/// Order time-in-force.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum TimeInForce {
    /// Fill-or-kill: must fill entirely or cancel.
    #[default]
    FOK,
    /// Good-till-cancelled: stays on book until filled or cancelled.
    GTC,
}

/// One order leg derived from an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Token to trade.
    pub token_id: String,
    /// Side the token belongs to.
    pub side: Outcome,
    pub action: OrderAction,
    /// Notional in USDC at the limit price.
    pub size_usdc: Decimal,
    /// Shares to buy or sell.
    pub shares: Decimal,
    /// Worst acceptable price; `None` for a market order.
    pub limit_price: Option<Decimal>,
    pub tif: TimeInForce,
}

impl OrderRequest {
    /// Buy `size_usdc` worth of `side` at `price`.
    pub fn buy(
        token_id: impl Into<String>,
        side: Outcome,
        size_usdc: Decimal,
        price: Decimal,
    ) -> Result<Self, ExecutionError> {
        if price <= Decimal::ZERO {
            return Err(ExecutionError::InvalidParams(format!(
                "buy price must be positive, got {price}"
            )));
        }
        Ok(Self {
            token_id: token_id.into(),
            side,
            action: OrderAction::Buy,
            size_usdc,
            shares: size_usdc / price,
            limit_price: Some(price),
            tif: TimeInForce::FOK,
        })
    }

    /// Sell `shares` of `side` at `price`.
    pub fn sell(
        token_id: impl Into<String>,
        side: Outcome,
        shares: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            action: OrderAction::Sell,
            size_usdc: shares * price,
            shares,
            limit_price: Some(price),
            tif: TimeInForce::FOK,
        }
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        let invalid = |msg: &str| Err(ExecutionError::InvalidParams(msg.to_string()));
        if self.token_id.is_empty() {
            return invalid("token_id is required");
        }
        if self.shares <= Decimal::ZERO {
            return invalid("shares must be positive");
        }
        match self.limit_price {
            Some(price) if price <= Decimal::ZERO || price >= Decimal::ONE => {
                invalid("limit price must be within (0, 1)")
            }
            _ => Ok(()),
        }
    }
}

/// Confirmed execution of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Average fill price.
    pub price: Decimal,
    /// Shares filled.
    pub size: Decimal,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Order status from API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderStatus {
    Pending,
    /// Resting on the book.
    Live,
    /// Fully matched.
    #[strum(serialize = "filled", serialize = "matched")]
    Filled,
    #[strum(serialize = "canceled", serialize = "cancelled")]
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Order state as last read from the exchange.
#[derive(Debug, Clone, Default)]
pub struct OrderState {
    pub order_id: String,
    pub status: Option<OrderStatus>,
    pub filled_size: Option<Decimal>,
    /// Average matched price, when reported.
    pub avg_price: Option<Decimal>,
    pub is_terminal: bool,
    pub is_filled: bool,
}
