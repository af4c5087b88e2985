//! Order sinks: where intents turn into fills.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use super::execution::{cancel_order, submit_order, wait_for_terminal_order};
use super::order::{Fill, OrderAction, OrderRequest};
use crate::config::Config;
use crate::error::ExecutionError;
use crate::market::PolymarketClient;

/// Places one order and reports its confirmed fill.
///
/// An `Err` means nothing was filled; the caller leaves its state untouched.
#[async_trait]
pub trait OrderSink: Send {
    async fn place_order(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError>;

    /// USDC available for new entries, if the sink tracks it.
    fn balance(&self) -> Option<Decimal> {
        None
    }
}

/// Dry-run sink: fills immediately at the limit price against a simulated
/// USDC balance.
#[derive(Debug, Clone)]
pub struct PaperSink {
    balance: Decimal,
    fills: u64,
}

impl PaperSink {
    pub fn new(balance: Decimal) -> Self {
        Self { balance, fills: 0 }
    }

    /// Number of orders filled so far.
    pub fn fills(&self) -> u64 {
        self.fills
    }
}

#[async_trait]
impl OrderSink for PaperSink {
    #[instrument(skip(self, order), fields(token = %order.token_id, action = %order.action))]
    async fn place_order(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        order.validate()?;
        let price = order.limit_price.ok_or_else(|| {
            ExecutionError::InvalidParams("paper fills need a limit price".to_string())
        })?;
        let fill = Fill {
            price,
            size: order.shares,
        };

        match order.action {
            OrderAction::Buy => {
                let cost = fill.notional();
                if cost > self.balance {
                    return Err(ExecutionError::InsufficientBalance {
                        required: cost,
                        available: self.balance,
                    });
                }
                self.balance -= cost;
            }
            OrderAction::Sell => self.balance += fill.notional(),
        }
        self.fills += 1;

        info!(
            side = %order.side,
            %price,
            shares = %fill.size,
            balance = %self.balance,
            "[DRY RUN] order filled"
        );
        Ok(fill)
    }

    fn balance(&self) -> Option<Decimal> {
        Some(self.balance)
    }
}

/// Live sink: signed CLOB order, then status polling until terminal.
#[derive(Debug, Clone)]
pub struct ClobSink {
    client: PolymarketClient,
    timeout: Duration,
    poll_interval: Duration,
}

impl ClobSink {
    pub fn new(client: PolymarketClient, config: &Config) -> Self {
        Self {
            client,
            timeout: Duration::from_millis(config.order_timeout_ms),
            poll_interval: Duration::from_millis(config.order_poll_interval_ms),
        }
    }
}

#[async_trait]
impl OrderSink for ClobSink {
    #[instrument(skip(self, order), fields(token = %order.token_id, action = %order.action))]
    async fn place_order(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        if order.action == OrderAction::Buy {
            let available = self.client.get_balance().await?;
            if available < order.size_usdc {
                return Err(ExecutionError::InsufficientBalance {
                    required: order.size_usdc,
                    available,
                });
            }
        }

        let order_id = submit_order(&self.client, order).await?;
        let state = wait_for_terminal_order(
            &self.client,
            &order_id,
            order.shares,
            self.timeout,
            self.poll_interval,
        )
        .await;

        if state.is_filled {
            let fill = Fill {
                price: state.avg_price.or(order.limit_price).unwrap_or_default(),
                size: state.filled_size.unwrap_or(order.shares),
            };
            debug!(%order_id, price = %fill.price, size = %fill.size, "order filled");
            return Ok(fill);
        }

        if state.is_terminal {
            let reason = state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(%order_id, %reason, "order ended unfilled");
            return Err(ExecutionError::OrderRejected { reason });
        }

        if let Err(e) = cancel_order(&self.client, &order_id).await {
            error!(%order_id, error = %e, "could not cancel timed-out order");
        }
        Err(ExecutionError::FillTimeout { order_id })
    }
}
