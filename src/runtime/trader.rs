//! The trader task: sole writer of engine and ledger state.
//!
//! Each event is handled to completion before the next one is read. An
//! intent is executed with a two-phase commit: the engine locks the sides it
//! touches, the order sink is awaited, and only a confirmed fill is
//! committed. Every lock is released before the handler returns.

use std::path::Path;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::TraderEvent;
use crate::api::{AppState, StatusSnapshot};
use crate::config::Config;
use crate::engine::{CloseReason, Intent, SignalEngine};
use crate::error::{BotError, ExecutionError, LedgerError, LifecycleError, ValidationError};
use crate::feed::Quote;
use crate::ledger::{PositionLedger, StateSnapshot};
use crate::market::{MarketBinding, Outcome};
use crate::metrics;
use crate::trading::execution::leg_label;
use crate::trading::{Fill, OrderRequest, OrderSink};

fn rejection_reason(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::PriceOutOfRange { .. } => "price_out_of_range",
        ValidationError::UnknownToken { .. } => "unknown_token",
        ValidationError::NoMarketAttached { .. } => "no_market",
        ValidationError::InvalidConfig { .. } => "invalid_config",
    }
}

pub struct Trader {
    engine: SignalEngine,
    ledger: PositionLedger,
    sink: Box<dyn OrderSink>,
    order_value_usdc: Decimal,
    dry_run: bool,
    stats_every: u64,
    ticks: u64,
    /// Timestamp of the latest quote; lifecycle events are stamped with it.
    last_event_at: Option<OffsetDateTime>,
    /// Latest best bid per side in the attached market, indexed by `Outcome::index`.
    bids: [Option<Decimal>; 2],
    status: Option<AppState>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Trader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trader")
            .field("engine", &self.engine)
            .field("ledger", &self.ledger)
            .field("order_value_usdc", &self.order_value_usdc)
            .field("dry_run", &self.dry_run)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl Trader {
    pub fn new(
        engine: SignalEngine,
        ledger: PositionLedger,
        sink: Box<dyn OrderSink>,
        config: &Config,
    ) -> Self {
        Self {
            engine,
            ledger,
            sink,
            order_value_usdc: config.order_value_usdc(),
            dry_run: config.dry_run,
            stats_every: config.stats_every_ticks,
            ticks: 0,
            last_event_at: None,
            bids: [None; 2],
            status: None,
            shutdown: None,
        }
    }

    /// Publish status to the HTTP surface after every event.
    pub fn with_status(mut self, state: AppState) -> Self {
        self.status = Some(state);
        self
    }

    /// Stop opening or flipping positions once `shutdown` flips to true.
    /// Queued events are still applied to the engine.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Balance reported by the order sink, if it tracks one.
    pub fn balance(&self) -> Option<Decimal> {
        self.sink.balance()
    }

    /// Consume events until every sender is gone, then hand the trader back
    /// for shutdown. Errors are logged; none stops the loop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<TraderEvent>) -> Self {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle(event).await {
                match e {
                    BotError::Validation(err) => debug!(%err, "observation skipped"),
                    BotError::Execution(err) => warn!(%err, "execution failed, state unchanged"),
                    other => error!(error = %other, "event failed"),
                }
            }
        }
        debug!("event queue closed");
        self
    }

    /// Apply one event.
    pub async fn handle(&mut self, event: TraderEvent) -> Result<(), BotError> {
        let result = match event {
            TraderEvent::Quote(quote) => self.on_quote(quote).await,
            TraderEvent::Attach(binding) => self.on_attach(binding).await,
            TraderEvent::Detach => self.on_detach().await,
        };
        self.publish_status().await;
        result
    }

    async fn on_quote(&mut self, quote: Quote) -> Result<(), BotError> {
        self.last_event_at = Some(quote.at);
        let intent = {
            let _timer = metrics::timer_evaluation();
            self.engine.evaluate_quote(&quote.token_id, quote.price, quote.at)
        };
        let intent = match intent {
            Ok(intent) => intent,
            Err(err) => {
                metrics::inc_observations_rejected(rejection_reason(&err));
                return Err(err.into());
            }
        };
        metrics::inc_observations();
        self.remember_bid(&quote);

        self.ticks += 1;
        if self.stats_every > 0 && self.ticks % self.stats_every == 0 {
            self.log_stats();
        }

        if intent.is_hold() {
            return Ok(());
        }
        if self.is_stopping() {
            debug!(kind = intent.kind(), "shutdown requested, intent skipped");
            return Ok(());
        }
        metrics::inc_intents(intent.kind());
        self.execute(intent, quote.at).await
    }

    /// Run an intent through begin, the order legs and commit. Locks are
    /// always released on return.
    #[instrument(skip(self), fields(kind = intent.kind()))]
    async fn execute(&mut self, intent: Intent, at: OffsetDateTime) -> Result<(), BotError> {
        self.engine.begin(&intent)?;
        let result = match intent {
            Intent::Hold => Ok(()),
            Intent::Enter { side, price, .. } => self.enter(side, price, at).await,
            Intent::ExitAndFlip {
                side,
                exit_price,
                flip_price,
            } => self.exit_and_flip(side, exit_price, flip_price, at).await,
        };
        self.engine.abort(&intent);
        result
    }

    async fn enter(&mut self, side: Outcome, price: Decimal, at: OffsetDateTime) -> Result<(), BotError> {
        let fill = self.buy(side, price).await?;
        self.engine.commit_entry(side, fill.price, fill.size, at)?;
        self.log_entry(side, &fill);
        Ok(())
    }

    async fn exit_and_flip(
        &mut self,
        side: Outcome,
        exit_price: Decimal,
        flip_price: Decimal,
        at: OffsetDateTime,
    ) -> Result<(), BotError> {
        let shares = self
            .engine
            .position()
            .open()
            .map(|pos| pos.shares)
            .ok_or(LifecycleError::NoOpenPosition)?;
        let token_id = self.token_id(side)?;
        // Sells cross the bid; feeds without bids sell at the quoted price.
        let limit = self.bids[side.index()].unwrap_or(exit_price);
        if limit != exit_price {
            debug!(%side, quoted = %exit_price, bid = %limit, "selling at best bid");
        }

        let fill = self
            .place(OrderRequest::sell(token_id, side, shares, limit))
            .await?;
        let record = self.engine.commit_exit(fill.price, at, CloseReason::Reversal)?;
        info!(
            side = %record.side,
            pnl = %record.realized_pnl,
            "exited on reversal, flipping to {}",
            side.opposite()
        );
        let recorded = self.ledger.record(record);
        if let Err(e) = &recorded {
            error!(error = %e, "failed to persist trade record");
        }

        let flip = side.opposite();
        match self.buy(flip, flip_price).await {
            Ok(fill) => {
                self.engine.commit_entry(flip, fill.price, fill.size, at)?;
                self.log_entry(flip, &fill);
            }
            Err(e) => {
                warn!(%flip, error = %e, "flip leg failed, staying flat");
                recorded?;
                return Err(e);
            }
        }
        recorded.map_err(Into::into)
    }

    async fn buy(&mut self, side: Outcome, price: Decimal) -> Result<Fill, BotError> {
        let token_id = self.token_id(side)?;
        let order = OrderRequest::buy(token_id, side, self.order_value_usdc, price)?;
        Ok(self.place(order).await?)
    }

    async fn place(&mut self, order: OrderRequest) -> Result<Fill, ExecutionError> {
        let leg = leg_label(order.action);
        let _timer = metrics::timer_order();
        match self.sink.place_order(&order).await {
            Ok(fill) => {
                metrics::inc_orders_filled(leg);
                Ok(fill)
            }
            Err(e) => {
                metrics::inc_orders_failed(leg);
                Err(e)
            }
        }
    }

    fn token_id(&self, side: Outcome) -> Result<String, BotError> {
        let binding = self.engine.binding().ok_or_else(|| ValidationError::NoMarketAttached {
            token_id: side.to_string(),
        })?;
        Ok(binding.token_id(side).to_string())
    }

    fn remember_bid(&mut self, quote: &Quote) {
        let side = self
            .engine
            .binding()
            .and_then(|b| b.side_of(&quote.token_id).ok());
        if let Some(side) = side {
            self.bids[side.index()] = quote.bid.filter(|bid| *bid > Decimal::ZERO);
        }
    }

    fn clock(&self) -> OffsetDateTime {
        self.last_event_at.unwrap_or_else(OffsetDateTime::now_utc)
    }

    async fn on_attach(&mut self, binding: MarketBinding) -> Result<(), BotError> {
        let slug = binding.slug.clone();
        let record = self.engine.attach(binding, self.clock()).inspect_err(|_| {
            metrics::inc_lifecycle_errors();
        })?;
        self.bids = [None; 2];
        let recorded = record.map_or(Ok(()), |r| self.ledger.record(r));
        if let Some(state) = &self.status {
            state.set_market(Some(slug)).await;
        }
        Ok(recorded?)
    }

    async fn on_detach(&mut self) -> Result<(), BotError> {
        let record = self.engine.detach(self.clock()).inspect_err(|_| {
            metrics::inc_lifecycle_errors();
        })?;
        self.bids = [None; 2];
        if let Some(state) = &self.status {
            state.set_market(None).await;
        }
        if let Some(record) = record {
            self.ledger.record(record)?;
        }
        Ok(())
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            dry_run: self.dry_run,
            position: self.engine.position().clone(),
            unrealized_pnl: self.engine.unrealized_pnl(),
            cumulative_pnl: self.ledger.cumulative_pnl(),
            last_up_price: self.engine.last_price(Outcome::Up),
            last_down_price: self.engine.last_price(Outcome::Down),
            ledger: self.ledger.stats(),
        }
    }

    async fn publish_status(&mut self) {
        metrics::set_pnl(self.ledger.cumulative_pnl(), self.engine.unrealized_pnl());
        if let Some(state) = &self.status {
            state.publish(self.status_snapshot()).await;
        }
    }

    fn log_entry(&self, side: Outcome, fill: &Fill) {
        info!("========================================");
        info!("{}POSITION OPENED: {}", if self.dry_run { "[DRY RUN] " } else { "" }, side);
        info!("Fill price:           ${}", fill.price);
        info!("Shares:               {}", fill.size);
        info!("Cost:                 ${}", fill.notional());
        info!("========================================");
    }

    /// Periodic summary of position and ledger.
    pub fn log_stats(&self) {
        let stats = self.ledger.stats();
        info!("========================================");
        info!("STATUS after {} observations", self.ticks);
        match self.engine.position().open() {
            Some(pos) => info!(
                "Holding {} @ ${} ({} shares), unrealized ${}",
                pos.side,
                pos.entry_price,
                pos.shares,
                self.engine.unrealized_pnl()
            ),
            None => info!("Flat"),
        }
        info!("Trades:               {}", stats.total_trades);
        info!("Total P&L:            ${}", stats.total_pnl);
        info!("Win rate:             {}%", stats.win_rate);
        if let Some(balance) = self.balance() {
            info!("Balance:              ${}", balance);
        }
        info!("========================================");
    }

    /// Persist the position snapshot and flush the ledger. The open position,
    /// if any, is kept as is.
    #[instrument(skip(self, state_path))]
    pub fn shutdown(&mut self, state_path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let snapshot = StateSnapshot {
            position: self.engine.position().clone(),
            binding: self.engine.position_binding().cloned(),
            saved_at: OffsetDateTime::now_utc(),
        };
        snapshot.save(state_path)?;
        self.ledger.flush()?;
        self.log_stats();
        info!(
            holding = ?self.engine.position().side(),
            cumulative_pnl = %self.ledger.cumulative_pnl(),
            "state persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineParams, PositionState, TradeRecord};
    use crate::ledger::TradeStore;
    use crate::trading::PaperSink;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use time::macros::datetime;
    use time::Duration;

    const T0: OffsetDateTime = datetime!(2025-01-01 0:00 UTC);

    /// Fails every order.
    struct RejectingSink;

    #[async_trait]
    impl OrderSink for RejectingSink {
        async fn place_order(&mut self, _order: &OrderRequest) -> Result<Fill, ExecutionError> {
            Err(ExecutionError::OrderRejected {
                reason: "not enough liquidity".to_string(),
            })
        }
    }

    /// Store whose disk is always full.
    struct FullDisk;

    impl TradeStore for FullDisk {
        fn load(&mut self) -> Result<Vec<TradeRecord>, LedgerError> {
            Ok(Vec::new())
        }

        fn append(&mut self, _record: &TradeRecord) -> Result<(), LedgerError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    fn config() -> Config {
        Config {
            position_value_usdc: dec!(10),
            stats_every_ticks: 0,
            ..Config::default()
        }
    }

    fn trader(sink: Box<dyn OrderSink>) -> Trader {
        trader_with_ledger(sink, PositionLedger::in_memory())
    }

    fn trader_with_ledger(sink: Box<dyn OrderSink>, ledger: PositionLedger) -> Trader {
        let params = EngineParams {
            entry_price_threshold: dec!(0.30),
            ..EngineParams::default()
        };
        Trader::new(SignalEngine::new(params), ledger, sink, &config())
    }

    fn quote_with_bid(token: &str, price: Decimal, bid: Decimal, secs: i64) -> TraderEvent {
        TraderEvent::Quote(Quote::new(token, price, T0 + Duration::seconds(secs)).with_bid(bid))
    }

    fn binding() -> MarketBinding {
        MarketBinding::new("btc-updown-15m-1", "u", "d")
    }

    fn quote(token: &str, price: Decimal, secs: i64) -> TraderEvent {
        TraderEvent::Quote(Quote::new(token, price, T0 + Duration::seconds(secs)))
    }

    #[tokio::test]
    async fn rebound_entry_buys_configured_value() {
        let mut trader = trader(Box::new(PaperSink::new(dec!(100))));
        trader.handle(TraderEvent::Attach(binding())).await.unwrap();
        trader.handle(quote("u", dec!(0.45), 1)).await.unwrap();
        trader.handle(quote("u", dec!(0.475), 2)).await.unwrap();

        let pos = trader.engine().position().open().unwrap();
        assert_eq!(pos.side, Outcome::Up);
        assert_eq!(pos.entry_price, dec!(0.475));
        assert_eq!(pos.size_usdc.round_dp(6), dec!(10));
        assert_eq!(trader.balance().unwrap().round_dp(6), dec!(90));
        assert!(!trader.engine().is_locked(Outcome::Up));
    }

    #[tokio::test]
    async fn rejected_order_leaves_state_and_releases_lock() {
        let mut trader = trader(Box::new(RejectingSink));
        trader.handle(TraderEvent::Attach(binding())).await.unwrap();
        trader.handle(quote("u", dec!(0.45), 1)).await.unwrap();

        let err = trader.handle(quote("u", dec!(0.475), 2)).await.unwrap_err();
        assert!(matches!(err, BotError::Execution(ExecutionError::OrderRejected { .. })));
        assert_eq!(trader.engine().position(), &PositionState::Flat);
        assert!(!trader.engine().is_locked(Outcome::Up));
        assert!(trader.ledger().records().is_empty());
    }

    #[tokio::test]
    async fn invalid_quote_is_a_validation_error() {
        let mut trader = trader(Box::new(PaperSink::new(dec!(100))));
        trader.handle(TraderEvent::Attach(binding())).await.unwrap();

        let err = trader.handle(quote("u", dec!(1.2), 1)).await.unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        let err = trader.handle(quote("zzz", dec!(0.5), 1)).await.unwrap_err();
        assert!(matches!(
            err,
            BotError::Validation(ValidationError::UnknownToken { .. })
        ));
        assert!(trader.engine().extrema(Outcome::Up).is_none());
    }

    #[tokio::test]
    async fn quotes_before_attach_are_rejected() {
        let mut trader = trader(Box::new(PaperSink::new(dec!(100))));
        let err = trader.handle(quote("u", dec!(0.5), 1)).await.unwrap_err();
        assert!(matches!(
            err,
            BotError::Validation(ValidationError::NoMarketAttached { .. })
        ));
    }

    #[tokio::test]
    async fn status_is_published_to_app_state() {
        let state = AppState::new();
        let mut trader = trader(Box::new(PaperSink::new(dec!(100)))).with_status(state.clone());

        trader.handle(TraderEvent::Attach(binding())).await.unwrap();
        assert!(state.is_ready());
        trader.handle(quote("d", dec!(0.40), 1)).await.unwrap();
        assert_eq!(state.status.read().await.last_down_price, Some(dec!(0.40)));

        trader.handle(TraderEvent::Detach).await.unwrap();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn run_drains_queue_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let trader = trader(Box::new(PaperSink::new(dec!(100))));
        let handle = tokio::spawn(trader.run(rx));

        tx.send(TraderEvent::Attach(binding())).await.unwrap();
        tx.send(quote("u", dec!(0.45), 1)).await.unwrap();
        tx.send(quote("u", dec!(1.5), 2)).await.unwrap();
        tx.send(quote("u", dec!(0.48), 3)).await.unwrap();
        drop(tx);

        let trader = handle.await.unwrap();
        assert_eq!(trader.engine().position().side(), Some(Outcome::Up));
    }

    #[tokio::test]
    async fn reversal_exit_sells_at_best_bid() {
        let mut trader = trader(Box::new(PaperSink::new(dec!(100))));
        trader.handle(TraderEvent::Attach(binding())).await.unwrap();
        trader.handle(quote_with_bid("u", dec!(0.45), dec!(0.43), 1)).await.unwrap();
        trader.handle(quote_with_bid("u", dec!(0.475), dec!(0.46), 2)).await.unwrap();
        trader.handle(quote_with_bid("u", dec!(0.70), dec!(0.68), 3)).await.unwrap();
        trader.handle(quote_with_bid("u", dec!(0.66), dec!(0.64), 4)).await.unwrap();

        let record = &trader.ledger().records()[0];
        assert_eq!(record.reason, CloseReason::Reversal);
        assert_eq!(record.entry_price, dec!(0.475));
        assert_eq!(record.exit_price, dec!(0.64));

        let pos = trader.engine().position().open().unwrap();
        assert_eq!(pos.side, Outcome::Down);
        assert_eq!(pos.entry_price, dec!(0.34));
    }

    #[tokio::test]
    async fn no_new_positions_after_shutdown() {
        let (stop, shutdown) = watch::channel(false);
        let mut trader = trader(Box::new(PaperSink::new(dec!(100)))).with_shutdown(shutdown);
        trader.handle(TraderEvent::Attach(binding())).await.unwrap();
        trader.handle(quote("u", dec!(0.45), 1)).await.unwrap();

        stop.send(true).unwrap();
        trader.handle(quote("u", dec!(0.475), 2)).await.unwrap();

        assert_eq!(trader.engine().position(), &PositionState::Flat);
        assert!(!trader.engine().is_locked(Outcome::Up));
        assert_eq!(trader.balance(), Some(dec!(100)));
        assert_eq!(
            trader.engine().extrema(Outcome::Up).map(|e| e.high),
            Some(dec!(0.475))
        );
    }

    #[tokio::test]
    async fn failed_ledger_write_keeps_realized_pnl() {
        let ledger = PositionLedger::open(FullDisk).unwrap();
        let mut trader = trader_with_ledger(Box::new(PaperSink::new(dec!(100))), ledger);
        trader.handle(TraderEvent::Attach(binding())).await.unwrap();
        trader.handle(quote("u", dec!(0.45), 1)).await.unwrap();
        trader.handle(quote("u", dec!(0.475), 2)).await.unwrap();
        trader.handle(quote("u", dec!(0.70), 3)).await.unwrap();

        let err = trader.handle(quote("u", dec!(0.60), 4)).await.unwrap_err();
        assert!(matches!(err, BotError::Ledger(_)));
        assert_eq!(trader.engine().position().side(), Some(Outcome::Down));

        let records = trader.ledger().records();
        assert_eq!(records.len(), 1);
        assert!(records[0].realized_pnl > Decimal::ZERO);
        assert_eq!(trader.ledger().cumulative_pnl(), records[0].realized_pnl);
        assert_eq!(trader.ledger().unpersisted(), 1);
    }
}
