//! Append-only history of closed positions.
//!
//! The ledger outlives market instances: records from every market and every
//! process run accumulate in one store, and cumulative P&L is always the sum
//! over that history.

pub mod store;

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::TradeRecord;
use crate::error::LedgerError;

pub use store::{JsonlStore, MemoryStore, StateSnapshot, TradeStore};

/// Summary statistics over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total_trades: usize,
    pub total_pnl: Decimal,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Winning trades as a percentage of all trades.
    pub win_rate: Decimal,
    pub average_pnl: Decimal,
}

impl LedgerStats {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let total_trades = records.len();
        if total_trades == 0 {
            return Self::default();
        }

        let total_pnl: Decimal = records.iter().map(|r| r.realized_pnl).sum();
        let winning_trades = records.iter().filter(|r| r.is_win()).count();
        let losing_trades = records
            .iter()
            .filter(|r| r.realized_pnl < Decimal::ZERO)
            .count();
        let count = Decimal::from(total_trades);

        Self {
            total_trades,
            total_pnl,
            winning_trades,
            losing_trades,
            win_rate: (Decimal::from(winning_trades) * Decimal::ONE_HUNDRED / count).round_dp(2),
            average_pnl: total_pnl / count,
        }
    }
}

/// Trade history backed by a [`TradeStore`].
///
/// A record joins the in-memory history as soon as it is booked. Records the
/// store refused stay queued and are written, in order, on the next
/// [`record`](PositionLedger::record) or [`flush`](PositionLedger::flush).
pub struct PositionLedger {
    store: Box<dyn TradeStore>,
    records: Vec<TradeRecord>,
    unpersisted: VecDeque<TradeRecord>,
}

impl std::fmt::Debug for PositionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionLedger")
            .field("records", &self.records.len())
            .field("unpersisted", &self.unpersisted.len())
            .finish()
    }
}

impl PositionLedger {
    /// Open a ledger, loading every stored record.
    pub fn open(mut store: impl TradeStore + 'static) -> Result<Self, LedgerError> {
        let records = store.load()?;
        Ok(Self {
            store: Box::new(store),
            records,
            unpersisted: VecDeque::new(),
        })
    }

    /// Ledger over an empty in-memory store.
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            records: Vec::new(),
            unpersisted: VecDeque::new(),
        }
    }

    /// Add a record to the history and persist it.
    ///
    /// The record counts toward P&L even when the store fails; the error is
    /// returned and the write is retried later.
    pub fn record(&mut self, record: TradeRecord) -> Result<(), LedgerError> {
        info!(
            side = %record.side,
            pnl = %record.realized_pnl,
            reason = %record.reason,
            total = self.records.len() + 1,
            "trade recorded"
        );
        self.records.push(record.clone());
        self.unpersisted.push_back(record);
        self.persist()
    }

    /// Write queued records oldest first, stopping at the first failure.
    fn persist(&mut self) -> Result<(), LedgerError> {
        while let Some(record) = self.unpersisted.front() {
            if let Err(e) = self.store.append(record) {
                warn!(error = %e, unpersisted = self.unpersisted.len(), "trade record not persisted");
                return Err(e);
            }
            self.unpersisted.pop_front();
        }
        Ok(())
    }

    /// Records held in memory that the store has not accepted yet.
    pub fn unpersisted(&self) -> usize {
        self.unpersisted.len()
    }

    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    /// Sum of realized P&L over the whole history.
    pub fn cumulative_pnl(&self) -> Decimal {
        self.records.iter().map(|r| r.realized_pnl).sum()
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats::from_records(&self.records)
    }

    pub fn flush(&mut self) -> Result<(), LedgerError> {
        self.persist()?;
        self.store.flush()
    }
}
