//! Integration tests for the flip bot.
//!
//! The trader tests run offline against paper and scripted order sinks.
//! Tests marked `#[ignore]` talk to the real Polymarket API:
//! cargo test --test integration -- --ignored

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tokio::sync::{mpsc, watch};

use polymarket_flip::config::{BoundaryPolicy, Config};
use polymarket_flip::engine::{CloseReason, EngineParams, PositionState, SignalEngine};
use polymarket_flip::error::{BotError, ExecutionError, LifecycleError};
use polymarket_flip::feed::{Quote, ReplayEvent, ReplayFeed};
use polymarket_flip::ledger::{JsonlStore, PositionLedger, StateSnapshot};
use polymarket_flip::market::{Market, MarketBinding, Outcome, PolymarketClient};
use polymarket_flip::runtime::{Scheduler, StopReason, Trader, TraderEvent};
use polymarket_flip::trading::{Fill, OrderRequest, OrderSink, PaperSink};

const T0: OffsetDateTime = datetime!(2025-01-01 0:00 UTC);

fn config(policy: BoundaryPolicy) -> Config {
    Config {
        position_value_usdc: dec!(10),
        entry_threshold_percent: dec!(5),
        entry_price_threshold: dec!(0.30),
        exit_reversal_percent: dec!(5),
        boundary_policy: policy,
        sim_balance: dec!(100),
        stats_every_ticks: 0,
        ..Config::default()
    }
}

fn trader_with(config: &Config, sink: Box<dyn OrderSink>, ledger: PositionLedger) -> Trader {
    Trader::new(
        SignalEngine::new(EngineParams::from_config(config)),
        ledger,
        sink,
        config,
    )
}

fn paper_trader(policy: BoundaryPolicy) -> Trader {
    let config = config(policy);
    let sink = Box::new(PaperSink::new(config.sim_balance));
    trader_with(&config, sink, PositionLedger::in_memory())
}

fn market_one() -> MarketBinding {
    MarketBinding::new("btc-updown-15m-1", "up-1", "down-1")
}

fn market_two() -> MarketBinding {
    MarketBinding::new("btc-updown-15m-2", "up-2", "down-2")
}

fn quote(token: &str, price: Decimal, secs: i64) -> TraderEvent {
    TraderEvent::Quote(Quote::new(token, price, T0 + Duration::seconds(secs)))
}

async fn feed(trader: &mut Trader, events: Vec<TraderEvent>) {
    for event in events {
        trader.handle(event).await.unwrap();
    }
}

/// Attach market one and enter UP at 0.475 off a 0.45 low.
async fn enter_up(trader: &mut Trader) {
    feed(
        trader,
        vec![
            TraderEvent::Attach(market_one()),
            quote("up-1", dec!(0.45), 1),
            quote("up-1", dec!(0.475), 2),
        ],
    )
    .await;
    assert_eq!(trader.engine().position().side(), Some(Outcome::Up));
}

fn temp_path(name: &str) -> PathBuf {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    std::env::temp_dir().join(format!(
        "polymarket-flip-it-{name}-{}-{nanos}",
        std::process::id()
    ))
}

/// Delegates to a paper sink but fails the listed calls (1-based).
struct ScriptedSink {
    paper: PaperSink,
    fail_on: Vec<usize>,
    calls: usize,
}

impl ScriptedSink {
    fn failing_on(fail_on: Vec<usize>) -> Self {
        Self {
            paper: PaperSink::new(dec!(100)),
            fail_on,
            calls: 0,
        }
    }
}

#[async_trait]
impl OrderSink for ScriptedSink {
    async fn place_order(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(ExecutionError::FillTimeout {
                order_id: format!("order-{}", self.calls),
            });
        }
        self.paper.place_order(order).await
    }

    fn balance(&self) -> Option<Decimal> {
        self.paper.balance()
    }
}

// === Trading cycle ===

#[tokio::test]
async fn reversal_flips_to_the_opposite_side() {
    let mut trader = paper_trader(BoundaryPolicy::Close);
    enter_up(&mut trader).await;

    feed(
        &mut trader,
        vec![
            quote("up-1", dec!(0.70), 3),
            quote("down-1", dec!(0.30), 3),
            quote("up-1", dec!(0.67), 4),
        ],
    )
    .await;
    assert_eq!(trader.engine().position().side(), Some(Outcome::Up));

    trader.handle(quote("up-1", dec!(0.665), 5)).await.unwrap();

    let pos = trader.engine().position().open().unwrap();
    assert_eq!(pos.side, Outcome::Down);
    assert_eq!(pos.entry_price, dec!(0.30));
    assert_eq!(pos.entry_time, T0 + Duration::seconds(5));

    let records = trader.ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].side, Outcome::Up);
    assert_eq!(records[0].reason, CloseReason::Reversal);
    assert_eq!(records[0].exit_price, dec!(0.665));
    assert_eq!(records[0].realized_pnl.round_dp(6), dec!(4));

    // 100 - 10 (UP) + 14 (UP sold) - 10 (DOWN)
    assert_eq!(trader.balance().unwrap().round_dp(6), dec!(94));
    assert!(!trader.engine().is_locked(Outcome::Up));
    assert!(!trader.engine().is_locked(Outcome::Down));
}

#[tokio::test]
async fn flip_without_opposite_quote_uses_complement_price() {
    let mut trader = paper_trader(BoundaryPolicy::Close);
    enter_up(&mut trader).await;

    feed(
        &mut trader,
        vec![quote("up-1", dec!(0.60), 3), quote("up-1", dec!(0.55), 4)],
    )
    .await;

    let pos = trader.engine().position().open().unwrap();
    assert_eq!(pos.side, Outcome::Down);
    assert_eq!(pos.entry_price, dec!(0.45));
}

#[tokio::test]
async fn exit_at_entry_price_realizes_zero() {
    let config = Config {
        exit_reversal_percent: dec!(0),
        ..config(BoundaryPolicy::Close)
    };
    let mut trader = trader_with(
        &config,
        Box::new(PaperSink::new(dec!(100))),
        PositionLedger::in_memory(),
    );
    enter_up(&mut trader).await;

    trader.handle(quote("up-1", dec!(0.475), 3)).await.unwrap();

    let records = trader.ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].realized_pnl, Decimal::ZERO);
    assert_eq!(trader.ledger().cumulative_pnl(), Decimal::ZERO);
}

#[tokio::test]
async fn price_threshold_entry_needs_no_rebound() {
    let mut trader = paper_trader(BoundaryPolicy::Close);
    feed(
        &mut trader,
        vec![
            TraderEvent::Attach(market_one()),
            quote("down-1", dec!(0.35), 1),
        ],
    )
    .await;
    assert!(trader.engine().position().is_flat());

    trader.handle(quote("down-1", dec!(0.28), 2)).await.unwrap();
    let pos = trader.engine().position().open().unwrap();
    assert_eq!(pos.side, Outcome::Down);
    assert_eq!(pos.entry_price, dec!(0.28));
}

#[tokio::test]
async fn never_holds_both_sides() {
    let mut trader = paper_trader(BoundaryPolicy::Close);
    enter_up(&mut trader).await;

    // DOWN rebounds hard while UP is held: no second position.
    feed(
        &mut trader,
        vec![
            quote("down-1", dec!(0.20), 3),
            quote("down-1", dec!(0.40), 4),
        ],
    )
    .await;

    assert_eq!(trader.engine().position().side(), Some(Outcome::Up));
    assert!(trader.ledger().records().is_empty());
}

// === Execution failures ===

#[tokio::test]
async fn failed_entry_leaves_state_unchanged() {
    let config = config(BoundaryPolicy::Close);
    let mut trader = trader_with(
        &config,
        Box::new(ScriptedSink::failing_on(vec![1])),
        PositionLedger::in_memory(),
    );
    feed(
        &mut trader,
        vec![
            TraderEvent::Attach(market_one()),
            quote("up-1", dec!(0.45), 1),
        ],
    )
    .await;
    let before = trader.engine().extrema(Outcome::Up);

    let err = trader.handle(quote("up-1", dec!(0.475), 2)).await.unwrap_err();
    assert!(matches!(
        err,
        BotError::Execution(ExecutionError::FillTimeout { .. })
    ));
    assert!(trader.engine().position().is_flat());
    assert!(!trader.engine().is_locked(Outcome::Up));
    assert_eq!(trader.balance(), Some(dec!(100)));

    // Extrema still track the rejected tick; the next tick retries.
    assert_eq!(trader.engine().extrema(Outcome::Up).unwrap().low, before.unwrap().low);
    trader.handle(quote("up-1", dec!(0.48), 3)).await.unwrap();
    assert_eq!(trader.engine().position().side(), Some(Outcome::Up));
}

#[tokio::test]
async fn failed_exit_keeps_the_position() {
    let config = config(BoundaryPolicy::Close);
    let mut trader = trader_with(
        &config,
        Box::new(ScriptedSink::failing_on(vec![2])),
        PositionLedger::in_memory(),
    );
    enter_up(&mut trader).await;

    trader.handle(quote("up-1", dec!(0.70), 3)).await.unwrap();
    let err = trader.handle(quote("up-1", dec!(0.60), 4)).await.unwrap_err();
    assert!(matches!(err, BotError::Execution(_)));

    let pos = trader.engine().position().open().unwrap();
    assert_eq!(pos.side, Outcome::Up);
    assert!(trader.ledger().records().is_empty());
    assert!(!trader.engine().is_locked(Outcome::Up));
    assert!(!trader.engine().is_locked(Outcome::Down));
}

#[tokio::test]
async fn failed_flip_leg_books_exit_and_stays_flat() {
    let config = config(BoundaryPolicy::Close);
    let mut trader = trader_with(
        &config,
        Box::new(ScriptedSink::failing_on(vec![3])),
        PositionLedger::in_memory(),
    );
    enter_up(&mut trader).await;

    trader.handle(quote("up-1", dec!(0.70), 3)).await.unwrap();
    let err = trader.handle(quote("up-1", dec!(0.60), 4)).await.unwrap_err();
    assert!(matches!(err, BotError::Execution(_)));

    assert!(trader.engine().position().is_flat());
    assert_eq!(trader.ledger().records().len(), 1);
    assert_eq!(trader.ledger().records()[0].reason, CloseReason::Reversal);
    assert!(!trader.engine().is_locked(Outcome::Down));
}

#[tokio::test]
async fn paper_balance_limits_entries() {
    let config = Config {
        sim_balance: dec!(5),
        ..config(BoundaryPolicy::Close)
    };
    let sink = Box::new(PaperSink::new(config.sim_balance));
    let mut trader = trader_with(&config, sink, PositionLedger::in_memory());

    trader.handle(TraderEvent::Attach(market_one())).await.unwrap();
    trader.handle(quote("up-1", dec!(0.45), 1)).await.unwrap();
    let err = trader.handle(quote("up-1", dec!(0.475), 2)).await.unwrap_err();

    assert!(matches!(
        err,
        BotError::Execution(ExecutionError::InsufficientBalance { .. })
    ));
    assert!(trader.engine().position().is_flat());
    assert_eq!(trader.balance(), Some(dec!(5)));
}

// === Market boundaries ===

#[tokio::test]
async fn close_policy_books_boundary_record_on_detach() {
    let mut trader = paper_trader(BoundaryPolicy::Close);
    enter_up(&mut trader).await;
    trader.handle(quote("up-1", dec!(0.52), 3)).await.unwrap();

    trader.handle(TraderEvent::Detach).await.unwrap();
    assert!(trader.engine().position().is_flat());
    let record = &trader.ledger().records()[0];
    assert_eq!(record.reason, CloseReason::Boundary);
    assert_eq!(record.exit_price, dec!(0.52));
    assert_eq!(record.market_slug, "btc-updown-15m-1");

    trader.handle(TraderEvent::Attach(market_two())).await.unwrap();
    assert!(trader.engine().extrema(Outcome::Up).is_none());
    assert!(trader.engine().last_price(Outcome::Up).is_none());
    assert_eq!(trader.ledger().records().len(), 1);
}

#[tokio::test]
async fn carry_policy_keeps_position_for_same_tokens_only() {
    let mut trader = paper_trader(BoundaryPolicy::Carry);
    enter_up(&mut trader).await;

    let same_tokens = MarketBinding::new("btc-updown-15m-1b", "up-1", "down-1");
    feed(
        &mut trader,
        vec![TraderEvent::Detach, TraderEvent::Attach(same_tokens)],
    )
    .await;
    assert_eq!(trader.engine().position().side(), Some(Outcome::Up));
    assert!(trader.ledger().records().is_empty());
    assert!(trader.engine().extrema(Outcome::Up).is_none());

    feed(
        &mut trader,
        vec![TraderEvent::Detach, TraderEvent::Attach(market_two())],
    )
    .await;
    assert!(trader.engine().position().is_flat());
    let record = &trader.ledger().records()[0];
    assert_eq!(record.reason, CloseReason::Boundary);
    // No UP quote in the carried market: closed at entry.
    assert_eq!(record.realized_pnl, Decimal::ZERO);
}

#[tokio::test]
async fn no_policy_surfaces_unresolved_position() {
    let mut trader = paper_trader(BoundaryPolicy::None);
    enter_up(&mut trader).await;

    let err = trader.handle(TraderEvent::Detach).await.unwrap_err();
    assert!(matches!(
        err,
        BotError::Lifecycle(LifecycleError::UnresolvedPosition {
            side: Outcome::Up,
            ..
        })
    ));
    assert_eq!(trader.engine().position().side(), Some(Outcome::Up));
    assert!(trader.ledger().records().is_empty());
}

// === Persistence ===

#[tokio::test]
async fn ledger_and_position_survive_restart() {
    let ledger_path = temp_path("ledger");
    let state_path = temp_path("state");
    let config = config(BoundaryPolicy::Carry);

    let cumulative = {
        let ledger = PositionLedger::open(JsonlStore::new(&ledger_path)).unwrap();
        let mut trader = trader_with(&config, Box::new(PaperSink::new(dec!(100))), ledger);
        enter_up(&mut trader).await;
        feed(
            &mut trader,
            vec![
                quote("up-1", dec!(0.70), 3),
                quote("down-1", dec!(0.30), 3),
                quote("up-1", dec!(0.60), 4),
            ],
        )
        .await;
        assert_eq!(trader.engine().position().side(), Some(Outcome::Down));
        trader.shutdown(&state_path).unwrap();
        trader.ledger().cumulative_pnl()
    };

    let ledger = PositionLedger::open(JsonlStore::new(&ledger_path)).unwrap();
    assert_eq!(ledger.records().len(), 1);
    assert_eq!(ledger.cumulative_pnl(), cumulative);

    let snapshot = StateSnapshot::load(&state_path).unwrap().unwrap();
    assert_eq!(snapshot.binding, Some(market_one()));
    let engine = SignalEngine::restore(
        EngineParams::from_config(&config),
        snapshot.position,
        snapshot.binding,
    );
    let mut trader = Trader::new(engine, ledger, Box::new(PaperSink::new(dec!(100))), &config);

    trader.handle(TraderEvent::Attach(market_one())).await.unwrap();
    let pos = trader.engine().position().open().unwrap();
    assert_eq!(pos.side, Outcome::Down);
    assert_eq!(pos.entry_price, dec!(0.30));

    let _ = std::fs::remove_file(&ledger_path);
    let _ = std::fs::remove_file(&state_path);
}

#[tokio::test]
async fn cumulative_pnl_spans_markets() {
    let mut trader = paper_trader(BoundaryPolicy::Close);
    enter_up(&mut trader).await;
    feed(
        &mut trader,
        vec![quote("up-1", dec!(0.55), 3), TraderEvent::Detach],
    )
    .await;

    feed(
        &mut trader,
        vec![
            TraderEvent::Attach(market_two()),
            quote("down-2", dec!(0.40), 10),
            quote("down-2", dec!(0.42), 11),
            quote("down-2", dec!(0.38), 12),
            TraderEvent::Detach,
        ],
    )
    .await;

    // Boundary close of UP, reversal off DOWN, boundary close of the UP flip.
    let records = trader.ledger().records();
    let reasons: Vec<_> = records.iter().map(|r| r.reason).collect();
    assert_eq!(
        reasons,
        vec![CloseReason::Boundary, CloseReason::Reversal, CloseReason::Boundary]
    );
    assert_eq!(records[1].market_slug, "btc-updown-15m-2");
    let sum: Decimal = records.iter().map(|r| r.realized_pnl).sum();
    assert_eq!(trader.ledger().cumulative_pnl(), sum);
    assert_eq!(trader.ledger().stats().total_trades, 3);
}

// === Replay and scheduling ===

fn replay_events() -> Vec<ReplayEvent> {
    let at = |secs: i64| T0 + Duration::seconds(secs);
    vec![
        ReplayEvent::Attach(market_one()),
        ReplayEvent::Quote(Quote::new("up-1", dec!(0.45), at(1))),
        ReplayEvent::Quote(Quote::new("down-1", dec!(0.55), at(1))),
        ReplayEvent::Quote(Quote::new("up-1", dec!(0.48), at(2))),
        ReplayEvent::Quote(Quote::new("up-1", dec!(0.70), at(3))),
        ReplayEvent::Quote(Quote::new("down-1", dec!(0.31), at(3))),
        ReplayEvent::Quote(Quote::new("up-1", dec!(0.65), at(4))),
        ReplayEvent::Detach,
    ]
}

#[tokio::test]
async fn replay_is_deterministic() {
    let mut results = Vec::new();
    for _ in 0..2 {
        let mut trader = paper_trader(BoundaryPolicy::Close);
        for event in ReplayFeed::new(replay_events()).into_events() {
            trader.handle(event).await.unwrap();
        }
        results.push((trader.ledger().records().to_vec(), trader.balance()));
    }

    assert_eq!(results[0], results[1]);
    let records = &results[0].0;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].reason, CloseReason::Reversal);
    assert_eq!(records[1].reason, CloseReason::Boundary);
    assert_eq!(records[1].side, Outcome::Down);
}

#[tokio::test]
async fn scheduler_feeds_trader_through_queue() {
    let (tx, rx) = mpsc::channel(4);
    let (_stop, shutdown) = watch::channel(false);
    let trader = paper_trader(BoundaryPolicy::Close);
    let handle = tokio::spawn(trader.run(rx));

    let quotes = replay_events()
        .into_iter()
        .filter(|e| matches!(e, ReplayEvent::Quote(_)));
    let mut scheduler = Scheduler::new(
        ReplayFeed::new(quotes),
        StdDuration::from_millis(2),
        tx,
        shutdown,
    );

    let now = OffsetDateTime::now_utc().unix_timestamp();
    let market = Market {
        slug: market_one().slug,
        id: "1".to_string(),
        up_token_id: "up-1".to_string(),
        down_token_id: "down-1".to_string(),
        start_timestamp: now,
        end_timestamp: now + Market::WINDOW_SECONDS,
        question: None,
    };
    assert_eq!(scheduler.run_market(&market).await, StopReason::FeedExhausted);
    drop(scheduler);

    let trader = handle.await.unwrap();
    assert_eq!(trader.ledger().records().len(), 2);
    assert_eq!(trader.engine().position(), &PositionState::Flat);
}

// === Live API ===

fn live_config() -> Option<Config> {
    dotenvy::dotenv().ok();
    let config = Config::load().ok()?;
    let key = &config.polymarket_private_key;
    if key.starts_with("0x1234") || key.len() < 64 {
        return None;
    }
    Some(config)
}

#[tokio::test]
#[ignore = "requires POLYMARKET_PRIVATE_KEY"]
async fn live_balance_is_readable() {
    let Some(config) = live_config() else {
        println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
        return;
    };

    let client = PolymarketClient::new(&config).unwrap();
    let address = client.get_address().unwrap();
    assert!(address.starts_with("0x"));
    assert_eq!(address.len(), 42);

    let balance = client.get_balance().await.unwrap();
    assert!(balance >= Decimal::ZERO);
}

#[tokio::test]
#[ignore = "requires network access"]
async fn live_market_discovery() {
    use polymarket_flip::market::discover_active_market;

    let client = PolymarketClient::new(&Config::default()).unwrap();
    match discover_active_market(client.http()).await {
        Ok(market) => {
            println!("Found active market: {}", market.slug);
            assert_ne!(market.up_token_id, market.down_token_id);
            assert!(!market.is_closed_at(market.start_timestamp));
        }
        Err(e) => println!("No active market found: {}", e),
    }
}
