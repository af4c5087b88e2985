//! Trade record stores and the position snapshot file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::engine::{PositionState, TradeRecord};
use crate::error::LedgerError;
use crate::market::MarketBinding;

/// Durable home of trade records.
pub trait TradeStore: Send {
    /// All stored records, oldest first.
    fn load(&mut self) -> Result<Vec<TradeRecord>, LedgerError>;

    /// Persist one record.
    fn append(&mut self, record: &TradeRecord) -> Result<(), LedgerError>;

    fn flush(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// One JSON record per line, append-only.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, LedgerError> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| LedgerError::Io(std::io::Error::other("ledger writer unavailable")))
    }
}

impl TradeStore for JsonlStore {
    fn load(&mut self) -> Result<Vec<TradeRecord>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no ledger file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|source| LedgerError::Corrupt { line: i + 1, source })?;
            records.push(record);
        }

        info!(path = %self.path.display(), count = records.len(), "ledger loaded");
        Ok(records)
    }

    fn append(&mut self, record: &TradeRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record)?;
        let writer = self.writer()?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LedgerError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

/// In-memory store for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<TradeRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `records`, as if loaded from disk.
    pub fn with_records(records: Vec<TradeRecord>) -> Self {
        Self { records }
    }
}

impl TradeStore for MemoryStore {
    fn load(&mut self) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self.records.clone())
    }

    fn append(&mut self, record: &TradeRecord) -> Result<(), LedgerError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Position and market binding saved at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub position: PositionState,
    pub binding: Option<MarketBinding>,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
}

impl StateSnapshot {
    /// Write the snapshot through a temp file so a crash never leaves half a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "state snapshot saved");
        Ok(())
    }

    /// Read a snapshot; a missing file is `None`.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>, LedgerError> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
