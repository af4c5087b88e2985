//! Polymarket CLOB API client wrapper.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{ExecutionError, MarketError};
use crate::orderbook::{OutcomeBook, PriceLevel};
use crate::signing::{self, WalletKind};

/// USDC amounts on the balance endpoint are in 6-decimal base units.
const USDC_UNITS: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Polymarket CLOB API client.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    http: reqwest::Client,
    clob_url: String,
    private_key: String,
    wallet: WalletKind,
}

/// Order book response from API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    /// Bid levels.
    pub bids: Option<Vec<OrderLevel>>,
    /// Ask levels.
    pub asks: Option<Vec<OrderLevel>>,
    /// Asset ID.
    pub asset_id: Option<String>,
}

/// Single price level as sent by the API (decimal strings).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderLevel {
    pub price: String,
    pub size: String,
}

impl OrderLevel {
    fn parse(&self) -> Option<PriceLevel> {
        Some(PriceLevel::new(self.price.parse().ok()?, self.size.parse().ok()?))
    }
}

/// Balance allowance response from API.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAllowanceResponse {
    /// Balance in base units.
    pub balance: Option<String>,
    /// Allowance in base units.
    pub allowance: Option<String>,
}

impl PolymarketClient {
    /// Create a client with the configured request timeout.
    pub fn new(config: &Config) -> Result<Self, MarketError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(Duration::from_millis(500))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            private_key: config.polymarket_private_key.clone(),
            wallet: WalletKind::try_from(config.polymarket_signature_type)?,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn wallet(&self) -> WalletKind {
        self.wallet
    }

    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    /// Fetch the order book snapshot of a token.
    #[instrument(skip(self), fields(token_id = %token_id))]
    pub async fn get_order_book(&self, token_id: &str) -> Result<OutcomeBook, MarketError> {
        let url = format!("{}/book", self.clob_url);

        let response = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketError::FetchFailed {
                slug: token_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let book: OrderBookResponse = response
            .json()
            .await
            .map_err(|e| MarketError::ParseError(format!("failed to parse order book: {e}")))?;

        Ok(convert_order_book(token_id, book, OffsetDateTime::now_utc()))
    }

    /// Get USDC balance using an authenticated call.
    #[instrument(skip(self))]
    pub async fn get_balance(&self) -> Result<Decimal, ExecutionError> {
        let url = format!("{}/balance-allowance", self.clob_url);
        let auth_headers = signing::generate_auth_headers(&self.private_key, self.wallet).await?;

        let mut request = self.http.get(&url);
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::SubmissionFailed(format!("failed to get balance: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::SubmissionFailed(format!(
                "balance request failed: HTTP {status} - {body}"
            )));
        }

        let balance: BalanceAllowanceResponse = response.json().await.map_err(|e| {
            ExecutionError::SubmissionFailed(format!("failed to parse balance: {e}"))
        })?;

        let balance = parse_usdc_units(balance.balance.as_deref());
        debug!(%balance, "retrieved USDC balance");
        Ok(balance)
    }

    /// Wallet address derived from the private key.
    pub fn get_address(&self) -> Result<String, ExecutionError> {
        signing::address_from_private_key(&self.private_key)
    }
}

fn convert_order_book(
    token_id: &str,
    response: OrderBookResponse,
    at: OffsetDateTime,
) -> OutcomeBook {
    let parse = |levels: Option<Vec<OrderLevel>>| {
        levels
            .unwrap_or_default()
            .iter()
            .filter_map(OrderLevel::parse)
            .collect::<Vec<_>>()
    };
    OutcomeBook::from_levels(token_id, parse(response.bids), parse(response.asks), at)
}

fn parse_usdc_units(raw: Option<&str>) -> Decimal {
    raw.and_then(|s| s.parse::<Decimal>().ok())
        .map(|units| units / USDC_UNITS)
        .unwrap_or(Decimal::ZERO)
}
