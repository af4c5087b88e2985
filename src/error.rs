//! Unified error types for the flip bot.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::market::Outcome;

/// Unified error type for the flip bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Rejected observation or configuration value.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Order placement failed.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Market attach/detach could not be applied.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Trade record store failure.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Market-related error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed or out-of-range input. Recovered locally: the input is skipped
/// and no state changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Price outside the open interval (0, 1).
    #[error("price {price} for {side} is outside (0, 1)")]
    PriceOutOfRange {
        /// Side the price was quoted for.
        side: Outcome,
        /// Offending price.
        price: Decimal,
    },

    /// Token id does not belong to the attached market.
    #[error("token {token_id} is not part of market {market}")]
    UnknownToken {
        /// Unrecognized token id.
        token_id: String,
        /// Slug of the attached market.
        market: String,
    },

    /// Observation arrived while no market is attached.
    #[error("no market attached, dropping quote for token {token_id}")]
    NoMarketAttached {
        /// Token id of the dropped quote.
        token_id: String,
    },

    /// Configuration value out of range.
    #[error("invalid {field}: {reason}")]
    InvalidConfig {
        /// Environment variable name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Order placement failures. The engine keeps its state and re-evaluates on
/// the next observation; the failed order is not retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Not enough USDC for the order.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// Order submission failed (network, HTTP status, bad response).
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    /// Order rejected by the exchange.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// Order did not fill within the polling window.
    #[error("order {order_id} not filled within timeout")]
    FillTimeout {
        /// The order ID that timed out.
        order_id: String,
    },

    /// Order status could not be read.
    #[error("failed to get order status for {order_id}: {reason}")]
    StatusFailed {
        /// Order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Order could not be cancelled after a timeout.
    #[error("failed to cancel order {order_id}: {reason}")]
    CancelFailed {
        /// Order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Signing error.
    #[error("signing error: {0}")]
    SigningError(String),
}

/// Position lifecycle violations. Always surfaced, never dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Market detached or replaced while a position is open and the boundary
    /// policy does not say how to resolve it.
    #[error("open {side} position (entry {entry_price}) has no boundary resolution policy")]
    UnresolvedPosition {
        /// Held side.
        side: Outcome,
        /// Entry price of the held position.
        entry_price: Decimal,
    },

    /// An intent touching this side is still waiting for its execution result.
    #[error("intent pending on {side}")]
    IntentPending {
        /// Locked side.
        side: Outcome,
    },

    /// Exit requested while flat.
    #[error("no open position to close")]
    NoOpenPosition,

    /// Entry requested while already holding.
    #[error("already holding {side}")]
    AlreadyHolding {
        /// Held side.
        side: Outcome,
    },
}

/// Trade record store errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying file error.
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be parsed.
    #[error("corrupt ledger record at line {line}: {source}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Parse error.
        source: serde_json::Error,
    },

    /// Record could not be serialized.
    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Market discovery and data errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// No active BTC 15-minute market could be found.
    #[error("no active BTC 15min market found")]
    NoActiveMarketFound,

    /// Failed to fetch market information.
    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed {
        /// The market slug (or token id) that failed.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The client was built from an invalid configuration.
    #[error(transparent)]
    Config(#[from] ValidationError),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
