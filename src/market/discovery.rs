//! Discovery of the active BTC 15-minute market.
//!
//! Markets open every 900 seconds with slug `btc-updown-15m-<start>`. The
//! computed slug for the current and upcoming windows is tried first, then
//! the Gamma listing of open markets.

use once_cell::sync::Lazy;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::types::{Market, MarketData};
use crate::error::MarketError;

/// Gamma markets endpoint.
const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com/markets";

/// Windows probed by the computed-slug strategy (current plus the next 90 minutes).
const WINDOWS_AHEAD: i64 = 7;

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^btc-updown-15m-(\d+)$").expect("valid regex"));

/// Slug of the window containing `now`.
pub fn slug_for(now: i64) -> String {
    let start = (now / Market::WINDOW_SECONDS) * Market::WINDOW_SECONDS;
    format!("btc-updown-15m-{start}")
}

/// Window start encoded in a slug.
pub fn slug_start(slug: &str) -> Result<i64, MarketError> {
    SLUG_PATTERN
        .captures(slug)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| MarketError::ParseError(format!("slug not in expected format: {slug}")))
}

/// Slug of the window following `slug`.
pub fn next_slug(slug: &str) -> Result<String, MarketError> {
    Ok(slug_for(slug_start(slug)? + Market::WINDOW_SECONDS))
}

/// Find the active BTC 15-minute market.
#[instrument(skip(client))]
pub async fn discover_active_market(client: &reqwest::Client) -> Result<Market, MarketError> {
    info!("Searching for current BTC 15min market...");
    let now = OffsetDateTime::now_utc().unix_timestamp();

    match try_computed_slugs(client, now).await {
        Ok(market) => {
            info!(slug = %market.slug, "Found market via computed slug");
            return Ok(market);
        }
        Err(e) => debug!(error = %e, "computed slugs exhausted"),
    }

    let market = try_gamma_listing(client, now).await?;
    info!(slug = %market.slug, "Found market via Gamma API");
    Ok(market)
}

async fn try_computed_slugs(client: &reqwest::Client, now: i64) -> Result<Market, MarketError> {
    for i in 0..WINDOWS_AHEAD {
        let slug = slug_for(now + i * Market::WINDOW_SECONDS);
        debug!(%slug, "Checking computed slug");

        match fetch_market_from_slug(client, &slug).await {
            Ok(market) if !market.is_closed_at(now) => return Ok(market),
            Ok(_) => debug!(%slug, "Market exists but is closed"),
            Err(e) => debug!(%slug, error = %e, "Slug not found"),
        }
    }

    Err(MarketError::NoActiveMarketFound)
}

async fn try_gamma_listing(client: &reqwest::Client, now: i64) -> Result<Market, MarketError> {
    let markets: Vec<MarketData> = client
        .get(GAMMA_API_URL)
        .query(&[("closed", "false"), ("limit", "500")])
        .send()
        .await?
        .json()
        .await
        .map_err(|e| MarketError::ParseError(format!("failed to parse Gamma response: {e}")))?;

    let slug = earliest_open_slug(&markets, now).ok_or(MarketError::NoActiveMarketFound)?;
    fetch_market_from_slug(client, &slug).await
}

/// Earliest BTC 15-minute slug whose window has not ended.
fn earliest_open_slug(markets: &[MarketData], now: i64) -> Option<String> {
    markets
        .iter()
        .filter(|m| m.closed != Some(true))
        .filter_map(|m| m.slug.as_deref())
        .filter_map(|slug| Some((slug_start(slug).ok()?, slug)))
        .filter(|(start, _)| now < start + Market::WINDOW_SECONDS)
        .min_by_key(|(start, _)| *start)
        .map(|(_, slug)| slug.to_string())
}

/// Fetch one market by slug from the Gamma API.
#[instrument(skip(client))]
pub async fn fetch_market_from_slug(
    client: &reqwest::Client,
    slug: &str,
) -> Result<Market, MarketError> {
    let slug = slug.split('?').next().unwrap_or(slug);

    let response = client
        .get(GAMMA_API_URL)
        .query(&[("slug", slug)])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let markets: Vec<MarketData> = response
        .json()
        .await
        .map_err(|e| MarketError::ParseError(format!("failed to parse market: {e}")))?;

    let data = markets
        .into_iter()
        .find(|m| m.slug.as_deref() == Some(slug))
        .ok_or_else(|| MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: "market slug not found".to_string(),
        })?;

    market_from_data(slug, data)
}

fn market_from_data(slug: &str, data: MarketData) -> Result<Market, MarketError> {
    let (up_token_id, down_token_id) = data.token_pair().ok_or_else(|| {
        MarketError::ParseError(format!("{slug}: expected an UP and a DOWN token"))
    })?;
    let start_timestamp = slug_start(slug)?;

    Ok(Market {
        slug: slug.to_string(),
        id: data.id.unwrap_or_default(),
        up_token_id,
        down_token_id,
        start_timestamp,
        end_timestamp: start_timestamp + Market::WINDOW_SECONDS,
        question: data.question,
    })
}
