//! CLOB order submission and status polling.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::order::{OrderAction, OrderRequest, OrderState, OrderStatus};
use crate::error::ExecutionError;
use crate::market::PolymarketClient;
use crate::signing;

/// Order submission body.
#[derive(Debug, Clone, Serialize)]
struct ClobOrderBody {
    token_id: String,
    side: String,
    price: String,
    size: String,
    fee_rate_bps: String,
    nonce: String,
    expiration: String,
    taker: String,
    maker: String,
    signature_type: u8,
    signature: String,
    order_type: String,
    neg_risk: bool,
}

/// Submit one signed order and return the exchange order id.
///
/// BTC 15-minute markets are neg-risk markets, so `neg_risk` is always set.
#[instrument(skip(client, order), fields(token = %order.token_id, action = %order.action))]
pub async fn submit_order(
    client: &PolymarketClient,
    order: &OrderRequest,
) -> Result<String, ExecutionError> {
    order.validate()?;
    let price = order.limit_price.ok_or_else(|| {
        ExecutionError::InvalidParams("CLOB orders need a limit price".to_string())
    })?;

    debug!(%price, shares = %order.shares, tif = %order.tif, "Submitting order");

    let address = client.get_address()?;
    let auth_headers = signing::generate_auth_headers(client.private_key(), client.wallet()).await?;

    let now = OffsetDateTime::now_utc();
    let nonce = (now.unix_timestamp_nanos() / 1_000_000).to_string();
    let expiration = (now.unix_timestamp() + 3600).to_string();
    let size = order.shares.round_dp(2);

    let order_message = format!(
        "{}:{}:{}:{}:{}:{}",
        order.token_id, order.action, price, size, nonce, expiration
    );
    let signature = signing::sign_message(client.private_key(), order_message.as_bytes()).await?;

    let body = ClobOrderBody {
        token_id: order.token_id.clone(),
        side: order.action.to_string(),
        price: price.to_string(),
        size: size.to_string(),
        fee_rate_bps: "0".to_string(),
        nonce,
        expiration,
        taker: "0x0000000000000000000000000000000000000000".to_string(),
        maker: address,
        signature_type: client.wallet() as u8,
        signature,
        order_type: order.tif.to_string(),
        neg_risk: true,
    };

    let mut request = client
        .http()
        .post(format!("{}/order", client.clob_url()))
        .json(&body);
    for (key, value) in auth_headers {
        request = request.header(key, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ExecutionError::SubmissionFailed(format!("HTTP request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ExecutionError::SubmissionFailed(format!(
            "HTTP {status} - {body}"
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ExecutionError::SubmissionFailed(format!("failed to parse response: {e}")))?;

    if let Some(reason) = json
        .get("errorMsg")
        .or_else(|| json.get("error"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return Err(ExecutionError::OrderRejected {
            reason: reason.to_string(),
        });
    }

    let order_id = extract_order_id(&json)
        .ok_or_else(|| ExecutionError::SubmissionFailed("no order id in response".to_string()))?;

    info!(
        %order_id,
        token_id = %order.token_id,
        action = %order.action,
        %price,
        %size,
        "Order submitted"
    );

    Ok(order_id)
}

/// Poll order status until it is terminal or `timeout` elapses.
#[instrument(skip(client), fields(order_id = %order_id))]
pub async fn wait_for_terminal_order(
    client: &PolymarketClient,
    order_id: &str,
    requested_size: Decimal,
    timeout: Duration,
    poll_interval: Duration,
) -> OrderState {
    let deadline = Instant::now() + timeout;

    loop {
        match get_order_status(client, order_id).await {
            Ok(state) => {
                if state.filled_size.is_some_and(|filled| filled >= requested_size) {
                    return OrderState {
                        is_terminal: true,
                        is_filled: true,
                        ..state
                    };
                }
                if state.is_terminal {
                    return state;
                }
            }
            Err(e) => warn!(error = %e, "Error getting order status"),
        }

        if Instant::now() >= deadline {
            warn!("Order status polling timed out");
            return OrderState {
                order_id: order_id.to_string(),
                ..Default::default()
            };
        }
        sleep(poll_interval).await;
    }
}

/// Read the current order state from the API.
pub async fn get_order_status(
    client: &PolymarketClient,
    order_id: &str,
) -> Result<OrderState, ExecutionError> {
    let status_failed = |reason: String| ExecutionError::StatusFailed {
        order_id: order_id.to_string(),
        reason,
    };

    let response = client
        .http()
        .get(format!("{}/data/order/{}", client.clob_url(), order_id))
        .send()
        .await
        .map_err(|e| status_failed(format!("HTTP request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(status_failed(format!("HTTP {}", response.status())));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| status_failed(format!("failed to parse response: {e}")))?;

    Ok(parse_order_state(order_id, &json))
}

fn parse_order_state(order_id: &str, json: &serde_json::Value) -> OrderState {
    let status = ["status", "orderStatus", "order_status"]
        .iter()
        .find_map(|k| json.get(*k))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<OrderStatus>().ok());

    OrderState {
        order_id: order_id.to_string(),
        status,
        filled_size: parse_decimal_field(json, &["size_matched", "filledSize", "filled"]),
        avg_price: parse_decimal_field(json, &["avg_price", "averagePrice", "price"]),
        is_terminal: status.is_some_and(|s| s.is_terminal()),
        is_filled: status.is_some_and(|s| s.is_filled()),
    }
}

/// Parse a decimal field from JSON, trying multiple field names.
fn parse_decimal_field(json: &serde_json::Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().filter_map(|k| json.get(*k)).find_map(|value| {
        value
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
            .or_else(|| value.as_f64().and_then(|n| Decimal::try_from(n).ok()))
    })
}

/// Cancel a resting order.
#[instrument(skip(client))]
pub async fn cancel_order(client: &PolymarketClient, order_id: &str) -> Result<(), ExecutionError> {
    let cancel_failed = |reason: String| ExecutionError::CancelFailed {
        order_id: order_id.to_string(),
        reason,
    };

    let auth_headers = signing::generate_auth_headers(client.private_key(), client.wallet()).await?;
    let mut request = client
        .http()
        .delete(format!("{}/order", client.clob_url()))
        .json(&serde_json::json!({ "orderID": order_id }));
    for (key, value) in auth_headers {
        request = request.header(key, value);
    }

    let response = request.send().await.map_err(|e| {
        error!(%order_id, error = %e, "Failed to cancel order");
        cancel_failed(e.to_string())
    })?;

    if !response.status().is_success() {
        error!(%order_id, status = %response.status(), "Failed to cancel order");
        return Err(cancel_failed(format!("HTTP {}", response.status())));
    }

    info!(%order_id, "Order cancelled");
    Ok(())
}

/// Extract the order id from a submission response.
pub fn extract_order_id(result: &serde_json::Value) -> Option<String> {
    ["orderID", "orderId", "order_id", "id"]
        .iter()
        .find_map(|key| result.get(*key).and_then(|v| v.as_str()))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            ["order", "data", "result"]
                .iter()
                .filter_map(|key| result.get(*key))
                .find_map(extract_order_id)
        })
}

/// Sell or buy leg label used in logs.
pub fn leg_label(action: OrderAction) -> &'static str {
    match action {
        OrderAction::Buy => "entry",
        OrderAction::Sell => "exit",
    }
}
