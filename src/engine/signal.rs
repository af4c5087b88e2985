//! Signal engine: entry, exit and flip decisions over the extremum tracker.
//!
//! Evaluation is side-effect free with respect to the position: it folds the
//! observation into the extrema and returns an [`Intent`]. The caller executes
//! the intent and commits each leg only after a confirmed fill, so a failed
//! order leaves the engine exactly where it was.

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::extrema::{ExtremaState, ExtremumTracker};
use super::state::{CloseReason, OpenPosition, PositionState, PriceObservation, TradeRecord};
use crate::config::{BoundaryPolicy, Config};
use crate::error::{BotError, LifecycleError, ValidationError};
use crate::market::{MarketBinding, Outcome};

/// Strategy parameters consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineParams {
    /// Rebound from the low, in percent.
    pub entry_threshold_percent: Decimal,
    /// Absolute entry price threshold in (0, 1).
    pub entry_price_threshold: Decimal,
    /// Drop from the high, in percent.
    pub exit_reversal_percent: Decimal,
    pub boundary_policy: BoundaryPolicy,
}

impl EngineParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            entry_threshold_percent: config.entry_threshold_percent,
            entry_price_threshold: config.entry_price_threshold,
            exit_reversal_percent: config.exit_reversal_percent,
            boundary_policy: config.boundary_policy,
        }
    }

    fn entry_trigger(&self, low: Decimal) -> Decimal {
        low * (Decimal::ONE + self.entry_threshold_percent / Decimal::ONE_HUNDRED)
    }

    fn exit_trigger(&self, high: Decimal) -> Decimal {
        high * (Decimal::ONE - self.exit_reversal_percent / Decimal::ONE_HUNDRED)
    }
}

impl Default for EngineParams {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Which entry rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntryTrigger {
    /// Price rebounded off its low.
    Rebound,
    /// Price at or below the absolute threshold.
    PriceThreshold,
}

/// Decision produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Hold,
    /// Open a position on `side` at about `price`.
    Enter {
        side: Outcome,
        price: Decimal,
        trigger: EntryTrigger,
    },
    /// Close the held `side` at about `exit_price`, then buy the opposite
    /// side at about `flip_price`.
    ExitAndFlip {
        side: Outcome,
        exit_price: Decimal,
        flip_price: Decimal,
    },
}

impl Intent {
    /// Sides whose state the intent would change.
    pub fn sides(&self) -> &'static [Outcome] {
        match self {
            Intent::Hold => &[],
            Intent::Enter {
                side: Outcome::Up, ..
            } => &[Outcome::Up],
            Intent::Enter {
                side: Outcome::Down,
                ..
            } => &[Outcome::Down],
            Intent::ExitAndFlip { .. } => &Outcome::ALL,
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Intent::Hold)
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Hold => "hold",
            Intent::Enter { .. } => "enter",
            Intent::ExitAndFlip { .. } => "exit_and_flip",
        }
    }
}

/// Entry candidate with its relative excess over the trigger.
struct Candidate {
    side: Outcome,
    price: Decimal,
    excess: Decimal,
}

/// Pick the candidate with the largest excess; exact ties keep the earlier
/// one, and candidates are produced `Up` first.
fn strongest(candidates: impl Iterator<Item = Candidate>) -> Option<Candidate> {
    candidates.fold(None, |best: Option<Candidate>, c| match best {
        Some(b) if b.excess >= c.excess => Some(b),
        _ => Some(c),
    })
}

/// Position/state engine for one bot.
///
/// Owns the extremum tracker, the position and the per-side pending locks.
/// Realized history lives in the ledger; commits hand back the
/// [`TradeRecord`] to append.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    params: EngineParams,
    tracker: ExtremumTracker,
    position: PositionState,
    last_price: [Option<Decimal>; 2],
    pending: [bool; 2],
    binding: Option<MarketBinding>,
    /// Binding a carried position was opened under, until the next attach.
    carried_from: Option<MarketBinding>,
}

impl SignalEngine {
    pub fn new(params: EngineParams) -> Self {
        Self {
            params,
            tracker: ExtremumTracker::new(),
            position: PositionState::Flat,
            last_price: [None, None],
            pending: [false, false],
            binding: None,
            carried_from: None,
        }
    }

    /// Rebuild an engine from a persisted position snapshot.
    ///
    /// The position is treated as carried from `binding`: the next attach
    /// keeps or closes it according to the boundary policy.
    pub fn restore(
        params: EngineParams,
        position: PositionState,
        binding: Option<MarketBinding>,
    ) -> Self {
        let mut engine = Self::new(params);
        if !position.is_flat() {
            engine.carried_from = binding;
        }
        engine.position = position;
        engine
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn binding(&self) -> Option<&MarketBinding> {
        self.binding.as_ref()
    }

    /// Binding to persist alongside the position.
    pub fn position_binding(&self) -> Option<&MarketBinding> {
        self.binding.as_ref().or(self.carried_from.as_ref())
    }

    pub fn extrema(&self, side: Outcome) -> Option<ExtremaState> {
        self.tracker.get(side)
    }

    /// Latest accepted price of a side in the attached market.
    pub fn last_price(&self, side: Outcome) -> Option<Decimal> {
        self.last_price[side.index()]
    }

    pub fn is_locked(&self, side: Outcome) -> bool {
        self.pending[side.index()]
    }

    fn any_locked(&self) -> Option<Outcome> {
        Outcome::ALL.into_iter().find(|s| self.is_locked(*s))
    }

    /// Mark-to-market P&L of the open position at its side's latest price.
    pub fn unrealized_pnl(&self) -> Decimal {
        match self.position.open() {
            Some(pos) => self
                .last_price(pos.side)
                .map(|price| pos.pnl_at(price))
                .unwrap_or(Decimal::ZERO),
            None => Decimal::ZERO,
        }
    }

    /// Resolve a raw token quote against the attached market and evaluate it.
    pub fn evaluate_quote(
        &mut self,
        token_id: &str,
        price: Decimal,
        at: OffsetDateTime,
    ) -> Result<Intent, ValidationError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| ValidationError::NoMarketAttached {
                token_id: token_id.to_string(),
            })?;
        let observation = binding.observation(token_id, price, at)?;
        self.evaluate(observation)
    }

    /// Fold an observation into the extrema and decide what to do.
    ///
    /// Never changes the position. Invalid prices are rejected before any
    /// state is touched.
    #[instrument(level = "debug", skip(self), fields(side = %obs.side, price = %obs.price))]
    pub fn evaluate(&mut self, obs: PriceObservation) -> Result<Intent, ValidationError> {
        self.tracker.update(obs.side, obs.price, obs.timestamp)?;
        self.last_price[obs.side.index()] = Some(obs.price);

        let intent = match self.position.open() {
            Some(pos) => self.evaluate_holding(pos.side),
            None => self.evaluate_flat(),
        };

        if !intent.is_hold() {
            info!(?intent, "signal");
        }
        Ok(intent)
    }

    fn evaluate_holding(&self, side: Outcome) -> Intent {
        if self.pending.iter().any(|locked| *locked) {
            return Intent::Hold;
        }
        let (Some(price), Some(extrema)) = (self.last_price(side), self.tracker.get(side)) else {
            return Intent::Hold;
        };

        let trigger = self.params.exit_trigger(extrema.high);
        if price > trigger {
            return Intent::Hold;
        }

        debug!(%side, %price, high = %extrema.high, %trigger, "reversal from high");
        let flip_price = self
            .last_price(side.opposite())
            .unwrap_or(Decimal::ONE - price);

        Intent::ExitAndFlip {
            side,
            exit_price: price,
            flip_price,
        }
    }

    /// Latest price and envelope of every unlocked side, `Up` first.
    fn open_sides(&self) -> impl Iterator<Item = (Outcome, Decimal, ExtremaState)> + '_ {
        Outcome::ALL.into_iter().filter_map(move |side| {
            if self.is_locked(side) {
                return None;
            }
            Some((side, self.last_price(side)?, self.tracker.get(side)?))
        })
    }

    fn evaluate_flat(&self) -> Intent {
        let rebound = strongest(self.open_sides().filter_map(|(side, price, extrema)| {
            let trigger = self.params.entry_trigger(extrema.low);
            (price >= trigger && trigger > Decimal::ZERO).then(|| Candidate {
                side,
                price,
                excess: (price - trigger) / trigger,
            })
        }));
        if let Some(c) = rebound {
            return Intent::Enter {
                side: c.side,
                price: c.price,
                trigger: EntryTrigger::Rebound,
            };
        }

        let threshold = self.params.entry_price_threshold;
        let cheap = strongest(self.open_sides().filter_map(|(side, price, _)| {
            (price <= threshold).then(|| Candidate {
                side,
                price,
                excess: (threshold - price) / threshold,
            })
        }));
        match cheap {
            Some(c) => Intent::Enter {
                side: c.side,
                price: c.price,
                trigger: EntryTrigger::PriceThreshold,
            },
            None => Intent::Hold,
        }
    }

    /// Take the pending locks of every side the intent touches.
    pub fn begin(&mut self, intent: &Intent) -> Result<(), LifecycleError> {
        if let Some(side) = intent.sides().iter().find(|s| self.is_locked(**s)) {
            return Err(LifecycleError::IntentPending { side: *side });
        }
        for side in intent.sides() {
            self.pending[side.index()] = true;
        }
        Ok(())
    }

    /// Release every lock the intent holds. Idempotent.
    pub fn abort(&mut self, intent: &Intent) {
        for side in intent.sides() {
            self.pending[side.index()] = false;
        }
    }

    /// Commit a confirmed entry fill and release the side's lock.
    pub fn commit_entry(
        &mut self,
        side: Outcome,
        fill_price: Decimal,
        shares: Decimal,
        at: OffsetDateTime,
    ) -> Result<&OpenPosition, BotError> {
        if let Some(held) = self.position.side() {
            return Err(LifecycleError::AlreadyHolding { side: held }.into());
        }
        self.tracker.seed(side, fill_price, at)?;

        let market_slug = self
            .binding
            .as_ref()
            .map(|b| b.slug.clone())
            .unwrap_or_default();
        self.position = PositionState::Holding(OpenPosition {
            side,
            entry_price: fill_price,
            size_usdc: fill_price * shares,
            shares,
            entry_time: at,
            market_slug,
        });
        self.pending[side.index()] = false;

        info!(%side, price = %fill_price, %shares, "position opened");
        self.position
            .open()
            .ok_or_else(|| LifecycleError::NoOpenPosition.into())
    }

    /// Commit a confirmed exit fill, go flat and release the side's lock.
    ///
    /// Both envelopes restart so the flip leg begins from fresh extrema.
    pub fn commit_exit(
        &mut self,
        fill_price: Decimal,
        at: OffsetDateTime,
        reason: CloseReason,
    ) -> Result<TradeRecord, LifecycleError> {
        let record = self.close(fill_price, at, reason)?;
        self.tracker.reset_all();
        self.pending[record.side.index()] = false;
        Ok(record)
    }

    fn close(
        &mut self,
        exit_price: Decimal,
        at: OffsetDateTime,
        reason: CloseReason,
    ) -> Result<TradeRecord, LifecycleError> {
        let position = self.position.open().ok_or(LifecycleError::NoOpenPosition)?;
        let record = TradeRecord::close(position, exit_price, at, reason);
        self.position = PositionState::Flat;

        info!(
            side = %record.side,
            entry = %record.entry_price,
            exit = %record.exit_price,
            pnl = %record.realized_pnl,
            %reason,
            "position closed"
        );
        Ok(record)
    }

    /// Close at the held side's last known price, or at entry when the side
    /// was never quoted in this market.
    fn close_at_boundary(&mut self, at: OffsetDateTime) -> Result<TradeRecord, LifecycleError> {
        let position = self.position.open().ok_or(LifecycleError::NoOpenPosition)?;
        let price = self
            .last_price(position.side)
            .unwrap_or(position.entry_price);
        self.close(price, at, CloseReason::Boundary)
    }

    fn unresolved(&self) -> Option<LifecycleError> {
        self.position
            .open()
            .map(|pos| LifecycleError::UnresolvedPosition {
                side: pos.side,
                entry_price: pos.entry_price,
            })
    }

    /// Bind a new market instance.
    ///
    /// Extrema and latest prices of both sides are cleared. An open position
    /// survives only under the carry policy with identical token ids;
    /// otherwise it is booked closed with a boundary record, which is
    /// returned for the ledger.
    pub fn attach(
        &mut self,
        binding: MarketBinding,
        at: OffsetDateTime,
    ) -> Result<Option<TradeRecord>, LifecycleError> {
        if let Some(side) = self.any_locked() {
            return Err(LifecycleError::IntentPending { side });
        }

        let mut record = None;
        if !self.position.is_flat() {
            let previous = self.binding.as_ref().or(self.carried_from.as_ref());
            let same_tokens = previous.is_some_and(|b| b.same_tokens(&binding));

            match self.params.boundary_policy {
                BoundaryPolicy::Carry if same_tokens => {
                    info!(slug = %binding.slug, "carrying open position into new market");
                }
                BoundaryPolicy::None => {
                    if let Some(err) = self.unresolved() {
                        return Err(err);
                    }
                }
                BoundaryPolicy::Close | BoundaryPolicy::Carry => {
                    record = Some(self.close_at_boundary(at)?);
                }
            }
        }

        self.tracker.reset_all();
        self.last_price = [None, None];
        self.carried_from = None;
        info!(slug = %binding.slug, "market attached");
        self.binding = Some(binding);
        Ok(record)
    }

    /// Release the current market instance.
    pub fn detach(&mut self, at: OffsetDateTime) -> Result<Option<TradeRecord>, LifecycleError> {
        if let Some(side) = self.any_locked() {
            return Err(LifecycleError::IntentPending { side });
        }

        let mut record = None;
        if !self.position.is_flat() {
            match self.params.boundary_policy {
                BoundaryPolicy::Close => record = Some(self.close_at_boundary(at)?),
                BoundaryPolicy::Carry => {
                    debug!("keeping open position across detach");
                    self.carried_from = self.binding.clone();
                }
                BoundaryPolicy::None => {
                    if let Some(err) = self.unresolved() {
                        warn!(%err, "detach refused");
                        return Err(err);
                    }
                }
            }
        }

        if let Some(binding) = self.binding.take() {
            info!(slug = %binding.slug, "market detached");
        }
        Ok(record)
    }
}
