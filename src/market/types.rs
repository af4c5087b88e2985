//! Market-related types for BTC 15-minute prediction markets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::engine::PriceObservation;
use crate::error::ValidationError;

/// Market outcome for BTC 15min binary markets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Outcome {
    /// BTC goes up (YES token).
    #[strum(to_string = "UP", serialize = "yes")]
    #[default]
    Up,
    /// BTC goes down (NO token).
    #[strum(to_string = "DOWN", serialize = "no")]
    Down,
}

impl Outcome {
    /// Both outcomes, `Up` first. Iteration order doubles as the tie-break order.
    pub const ALL: [Outcome; 2] = [Outcome::Up, Outcome::Down];

    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }

    /// Slot index for per-side arrays.
    pub fn index(&self) -> usize {
        match self {
            Outcome::Up => 0,
            Outcome::Down => 1,
        }
    }
}

/// Active BTC 15-minute market information.
#[derive(Debug, Clone)]
pub struct Market {
    /// Market slug (e.g., "btc-updown-15m-1765301400").
    pub slug: String,
    /// Unique market identifier.
    pub id: String,
    /// UP (YES) token ID for CLOB.
    pub up_token_id: String,
    /// DOWN (NO) token ID for CLOB.
    pub down_token_id: String,
    /// Unix timestamp when market opened.
    pub start_timestamp: i64,
    /// Unix timestamp when market closes (start + 900s).
    pub end_timestamp: i64,
    /// Market question text.
    pub question: Option<String>,
}

impl Market {
    /// Duration of a BTC 15-minute market in seconds.
    pub const WINDOW_SECONDS: i64 = 900;

    /// Get the token ID for a given outcome.
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Token-to-side mapping handed to the engine on attach.
    pub fn binding(&self) -> MarketBinding {
        MarketBinding {
            slug: self.slug.clone(),
            up_token_id: self.up_token_id.clone(),
            down_token_id: self.down_token_id.clone(),
        }
    }

    /// Check if the market is closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Check if the market is closed at a given unix timestamp.
    pub fn is_closed_at(&self, now: i64) -> bool {
        now >= self.end_timestamp
    }

    /// Get remaining time until market closes.
    pub fn time_remaining(&self) -> Option<std::time::Duration> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let remaining = self.end_timestamp - now;
        if remaining <= 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(remaining as u64))
        }
    }

    /// Format remaining time as "Xm Ys" string.
    pub fn time_remaining_str(&self) -> String {
        match self.time_remaining() {
            Some(duration) => {
                let secs = duration.as_secs();
                format!("{}m {}s", secs / 60, secs % 60)
            }
            None => "CLOSED".to_string(),
        }
    }
}

/// Side identifiers of one market instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBinding {
    /// Market slug, carried into trade records.
    pub slug: String,
    /// UP token id.
    pub up_token_id: String,
    /// DOWN token id.
    pub down_token_id: String,
}

impl MarketBinding {
    /// Create a binding from explicit token ids.
    pub fn new(
        slug: impl Into<String>,
        up_token_id: impl Into<String>,
        down_token_id: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            up_token_id: up_token_id.into(),
            down_token_id: down_token_id.into(),
        }
    }

    /// Token id for a side.
    pub fn token_id(&self, side: Outcome) -> &str {
        match side {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Resolve a token id to its side.
    pub fn side_of(&self, token_id: &str) -> Result<Outcome, ValidationError> {
        if token_id == self.up_token_id {
            Ok(Outcome::Up)
        } else if token_id == self.down_token_id {
            Ok(Outcome::Down)
        } else {
            Err(ValidationError::UnknownToken {
                token_id: token_id.to_string(),
                market: self.slug.clone(),
            })
        }
    }

    /// Whether two instances trade the same pair of tokens.
    pub fn same_tokens(&self, other: &MarketBinding) -> bool {
        self.up_token_id == other.up_token_id && self.down_token_id == other.down_token_id
    }

    /// Build an observation from a raw token quote.
    pub fn observation(
        &self,
        token_id: &str,
        price: Decimal,
        timestamp: OffsetDateTime,
    ) -> Result<PriceObservation, ValidationError> {
        let side = self.side_of(token_id)?;
        Ok(PriceObservation {
            side,
            price,
            timestamp,
        })
    }
}

/// Market entry from the Gamma API.
///
/// Gamma encodes list fields as JSON strings (`"[\"1\", \"2\"]"`); both
/// that and a plain array are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketData {
    /// Market slug.
    pub slug: Option<String>,
    /// Market ID.
    pub id: Option<String>,
    /// CLOB token IDs, in the same order as `outcomes`.
    #[serde(rename = "clobTokenIds", default, deserialize_with = "list_or_encoded")]
    pub clob_token_ids: Option<Vec<String>>,
    /// Outcome labels.
    #[serde(default, deserialize_with = "list_or_encoded")]
    pub outcomes: Option<Vec<String>>,
    /// Market question.
    pub question: Option<String>,
    /// Whether market is closed.
    pub closed: Option<bool>,
}

impl MarketData {
    /// Token ids as `(up, down)`, matched by outcome label when present.
    pub fn token_pair(&self) -> Option<(String, String)> {
        let tokens = self.clob_token_ids.as_ref().filter(|t| t.len() == 2)?;
        let labels = self.outcomes.as_ref().filter(|o| o.len() == 2);

        let up_index = match labels {
            Some(labels) => labels
                .iter()
                .position(|l| l.parse::<Outcome>().ok() == Some(Outcome::Up))?,
            None => 0,
        };
        Some((tokens[up_index].clone(), tokens[1 - up_index].clone()))
    }
}

fn list_or_encoded<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Encoded(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::List(list)) => Ok(Some(list)),
        Some(Raw::Encoded(text)) => serde_json::from_str(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
