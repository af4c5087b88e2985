//! Fixed-cadence feed polling for one market instance at a time.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::TraderEvent;
use crate::feed::PriceFeed;
use crate::market::Market;

/// Why [`Scheduler::run_market`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// The market reached its end time; a detach was queued.
    MarketClosed,
    /// The feed has nothing more to give; a detach was queued.
    FeedExhausted,
    /// Shutdown was requested. No detach is queued.
    Shutdown,
    /// The trader dropped its receiver.
    TraderGone,
}

/// Polls a [`PriceFeed`] and forwards quotes to the trader queue.
pub struct Scheduler<F> {
    feed: F,
    period: Duration,
    tx: mpsc::Sender<TraderEvent>,
    shutdown: watch::Receiver<bool>,
}

impl<F: PriceFeed> Scheduler<F> {
    pub fn new(
        feed: F,
        period: Duration,
        tx: mpsc::Sender<TraderEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            feed,
            period,
            tx,
            shutdown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Attach `market`, poll it until it closes, then detach.
    #[instrument(skip(self, market), fields(slug = %market.slug))]
    pub async fn run_market(&mut self, market: &Market) -> StopReason {
        if self.is_shutting_down() {
            return StopReason::Shutdown;
        }

        let binding = market.binding();
        if self.tx.send(TraderEvent::Attach(binding.clone())).await.is_err() {
            return StopReason::TraderGone;
        }
        info!(remaining = %market.time_remaining_str(), "polling market");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if self.is_shutting_down() || self.shutdown.has_changed().is_err() {
                        return StopReason::Shutdown;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if market.is_closed() {
                break StopReason::MarketClosed;
            }

            match self.feed.poll(&binding).await {
                Ok(quotes) => {
                    if quotes.is_empty() && self.feed.is_exhausted() {
                        break StopReason::FeedExhausted;
                    }
                    for quote in quotes {
                        if self.tx.send(TraderEvent::Quote(quote)).await.is_err() {
                            return StopReason::TraderGone;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "feed poll failed"),
            }
        };

        debug!(%reason, "market polling stopped");
        if self.tx.send(TraderEvent::Detach).await.is_err() {
            return StopReason::TraderGone;
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Quote, ReplayEvent, ReplayFeed};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn market(end_offset: i64) -> Market {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Market {
            slug: "btc-updown-15m-1".to_string(),
            id: "1".to_string(),
            up_token_id: "u".to_string(),
            down_token_id: "d".to_string(),
            start_timestamp: now - Market::WINDOW_SECONDS,
            end_timestamp: now + end_offset,
            question: None,
        }
    }

    fn replay() -> ReplayFeed {
        let t1 = datetime!(2025-01-01 0:00:01 UTC);
        let t2 = datetime!(2025-01-01 0:00:02 UTC);
        ReplayFeed::new([
            ReplayEvent::Quote(Quote::new("u", dec!(0.50), t1)),
            ReplayEvent::Quote(Quote::new("d", dec!(0.50), t1)),
            ReplayEvent::Quote(Quote::new("u", dec!(0.55), t2)),
        ])
    }

    fn drain(rx: &mut mpsc::Receiver<TraderEvent>) -> Vec<TraderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn forwards_quotes_between_attach_and_detach() {
        let (tx, mut rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);
        let mut scheduler = Scheduler::new(replay(), Duration::from_millis(5), tx, shutdown);

        let reason = scheduler.run_market(&market(600)).await;
        assert_eq!(reason, StopReason::FeedExhausted);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], TraderEvent::Attach(_)));
        assert!(matches!(&events[3], TraderEvent::Quote(q) if q.price == dec!(0.55)));
        assert_eq!(events[4], TraderEvent::Detach);
    }

    #[tokio::test]
    async fn closed_market_detaches_without_polling() {
        let (tx, mut rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);
        let mut scheduler = Scheduler::new(replay(), Duration::from_millis(5), tx, shutdown);

        let reason = scheduler.run_market(&market(-1)).await;
        assert_eq!(reason, StopReason::MarketClosed);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], TraderEvent::Detach);
    }

    #[tokio::test]
    async fn shutdown_stops_without_detach() {
        let (tx, mut rx) = mpsc::channel(16);
        let (stop, shutdown) = watch::channel(false);
        stop.send(true).unwrap();
        let mut scheduler = Scheduler::new(replay(), Duration::from_millis(5), tx, shutdown);

        assert_eq!(scheduler.run_market(&market(600)).await, StopReason::Shutdown);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn dropped_trader_is_reported() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let (_stop, shutdown) = watch::channel(false);
        let mut scheduler = Scheduler::new(replay(), Duration::from_millis(5), tx, shutdown);

        assert_eq!(scheduler.run_market(&market(600)).await, StopReason::TraderGone);
    }
}
