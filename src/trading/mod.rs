//! Trading module for order placement.
//!
//! This module handles:
//! - Order requests and fills
//! - CLOB submission and status polling
//! - Order sinks (paper and live)

pub mod execution;
pub mod order;
pub mod sink;

pub use execution::{cancel_order, submit_order, wait_for_terminal_order};
pub use order::{Fill, OrderAction, OrderRequest, OrderState, OrderStatus, TimeInForce};
pub use sink::{ClobSink, OrderSink, PaperSink};
