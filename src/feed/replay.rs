//! Deterministic replay of recorded quotes and market lifecycle events.
//!
//! The file is JSON lines, one event per line:
//!
//! ```text
//! {"type":"attach","slug":"btc-updown-15m-1765301400","up_token_id":"1","down_token_id":"2"}
//! {"type":"quote","token_id":"1","price":"0.47","at":"2025-12-09T17:30:01Z"}
//! {"type":"detach"}
//! ```

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{PriceFeed, Quote};
use crate::error::{LedgerError, MarketError};
use crate::market::MarketBinding;
use crate::runtime::TraderEvent;

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplayEvent {
    Attach(MarketBinding),
    Quote(Quote),
    Detach,
}

impl From<ReplayEvent> for TraderEvent {
    fn from(event: ReplayEvent) -> Self {
        match event {
            ReplayEvent::Attach(binding) => TraderEvent::Attach(binding),
            ReplayEvent::Quote(quote) => TraderEvent::Quote(quote),
            ReplayEvent::Detach => TraderEvent::Detach,
        }
    }
}

/// Recorded events played back in file order.
#[derive(Debug, Clone, Default)]
pub struct ReplayFeed {
    events: VecDeque<ReplayEvent>,
}

impl ReplayFeed {
    pub fn new(events: impl IntoIterator<Item = ReplayEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    /// Read a JSONL replay file; blank lines are skipped.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let mut events = VecDeque::new();
        for (i, line) in BufReader::new(File::open(path)?).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line)
                .map_err(|source| LedgerError::Corrupt { line: i + 1, source })?;
            events.push_back(event);
        }
        info!(path = %path.display(), count = events.len(), "replay loaded");
        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain every remaining event for the trader.
    pub fn into_events(self) -> impl Iterator<Item = TraderEvent> {
        self.events.into_iter().map(TraderEvent::from)
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    /// Next batch of quotes sharing one timestamp. Lifecycle events are
    /// skipped; the caller owns attach and detach when polling.
    async fn poll(&mut self, _binding: &MarketBinding) -> Result<Vec<Quote>, MarketError> {
        let mut batch: Vec<Quote> = Vec::new();
        while let Some(event) = self.events.front() {
            match event {
                ReplayEvent::Quote(q) if batch.first().map_or(true, |f| f.at == q.at) => {
                    batch.push(q.clone());
                    self.events.pop_front();
                }
                ReplayEvent::Quote(_) => break,
                ReplayEvent::Attach(_) | ReplayEvent::Detach => {
                    self.events.pop_front();
                }
            }
        }
        Ok(batch)
    }

    fn is_exhausted(&self) -> bool {
        self.is_empty()
    }
}
