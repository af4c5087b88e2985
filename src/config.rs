//! Application configuration loaded from environment variables.

use rust_decimal::Decimal;
use serde::Deserialize;
use strum::{Display, EnumString};

use crate::error::ValidationError;
use crate::signing::WalletKind;

/// Smallest order value the exchange accepts, in USDC.
pub const MIN_ORDER_USDC: Decimal = Decimal::from_parts(101, 0, 0, false, 2);

/// What happens to an open position when its market instance goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString, Default)]
#[serde(try_from = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BoundaryPolicy {
    /// Book the position closed at the last known price on detach.
    #[default]
    Close,
    /// Keep the position if the next market has the same token ids,
    /// otherwise close it at the last known price.
    Carry,
    /// No policy: detaching with an open position is a lifecycle error.
    None,
}

impl TryFrom<String> for BoundaryPolicy {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Strategy Parameters ===
    /// USDC committed per entry.
    #[serde(default = "default_position_value")]
    pub position_value_usdc: Decimal,

    /// Rebound from the low, in percent, that triggers an entry.
    #[serde(default = "default_entry_threshold_percent")]
    pub entry_threshold_percent: Decimal,

    /// Absolute price at or below which a flat engine enters.
    #[serde(default = "default_entry_price_threshold")]
    pub entry_price_threshold: Decimal,

    /// Drop from the high, in percent, that triggers exit-and-flip.
    #[serde(default = "default_exit_reversal_percent")]
    pub exit_reversal_percent: Decimal,

    /// Seconds between price polls.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// Open-position handling at market boundaries.
    #[serde(default)]
    pub boundary_policy: BoundaryPolicy,

    // === Operation Modes ===
    /// Simulation mode (no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Starting balance for simulation.
    #[serde(default = "default_sim_balance")]
    pub sim_balance: Decimal,

    /// Force specific market slug (bypasses auto-discovery).
    #[serde(default)]
    pub polymarket_market_slug: Option<String>,

    // === Persistence ===
    /// Append-only trade record file (one JSON record per line).
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Position snapshot written on shutdown.
    #[serde(default = "default_state_path")]
    pub state_path: String,

    // === Runtime ===
    /// Capacity of the observation queue between poller and engine.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Log ledger statistics every N observations.
    #[serde(default = "default_stats_every")]
    pub stats_every_ticks: u64,

    // === Polymarket Credentials ===
    /// Wallet private key (hex, starts with 0x). Required for live trading.
    #[serde(default)]
    pub polymarket_private_key: String,

    /// Signature type: 0=EOA, 1=Magic.link, 2=Gnosis Safe.
    #[serde(default)]
    pub polymarket_signature_type: u8,

    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// How long to wait for an order to reach a terminal state.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Poll interval while waiting for an order.
    #[serde(default = "default_order_poll_interval_ms")]
    pub order_poll_interval_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for health/status/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_position_value() -> Decimal {
    Decimal::new(10, 0) // $10
}

fn default_entry_threshold_percent() -> Decimal {
    Decimal::new(5, 0)
}

fn default_entry_price_threshold() -> Decimal {
    Decimal::new(60, 2) // 0.60
}

fn default_exit_reversal_percent() -> Decimal {
    Decimal::new(5, 0)
}

fn default_check_interval() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_sim_balance() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_ledger_path() -> String {
    "position_history.jsonl".to_string()
}

fn default_state_path() -> String {
    "bot_state.json".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_stats_every() -> u64 {
    60
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_http_timeout_ms() -> u64 {
    5_000
}

fn default_order_timeout_ms() -> u64 {
    3_000
}

fn default_order_poll_interval_ms() -> u64 {
    250
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            position_value_usdc: default_position_value(),
            entry_threshold_percent: default_entry_threshold_percent(),
            entry_price_threshold: default_entry_price_threshold(),
            exit_reversal_percent: default_exit_reversal_percent(),
            check_interval_seconds: default_check_interval(),
            boundary_policy: BoundaryPolicy::default(),
            dry_run: default_true(),
            sim_balance: default_sim_balance(),
            polymarket_market_slug: None,
            ledger_path: default_ledger_path(),
            state_path: default_state_path(),
            queue_capacity: default_queue_capacity(),
            stats_every_ticks: default_stats_every(),
            polymarket_private_key: String::new(),
            polymarket_signature_type: 0,
            polymarket_clob_url: default_clob_url(),
            http_timeout_ms: default_http_timeout_ms(),
            order_timeout_ms: default_order_timeout_ms(),
            order_poll_interval_ms: default_order_poll_interval_ms(),
            port: default_port(),
            rust_log: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |field: &'static str, reason: &str| ValidationError::InvalidConfig {
            field,
            reason: reason.to_string(),
        };

        if self.position_value_usdc <= Decimal::ZERO {
            return Err(invalid("POSITION_VALUE_USDC", "must be positive"));
        }

        if self.entry_threshold_percent < Decimal::ZERO
            || self.entry_threshold_percent > Decimal::ONE_HUNDRED
        {
            return Err(invalid("ENTRY_THRESHOLD_PERCENT", "must be within 0-100"));
        }

        if self.entry_price_threshold <= Decimal::ZERO || self.entry_price_threshold >= Decimal::ONE
        {
            return Err(invalid("ENTRY_PRICE_THRESHOLD", "must be within (0, 1)"));
        }

        if self.exit_reversal_percent < Decimal::ZERO
            || self.exit_reversal_percent > Decimal::ONE_HUNDRED
        {
            return Err(invalid("EXIT_REVERSAL_PERCENT", "must be within 0-100"));
        }

        if self.check_interval_seconds == 0 {
            return Err(invalid("CHECK_INTERVAL_SECONDS", "must be greater than 0"));
        }

        if self.queue_capacity == 0 {
            return Err(invalid("QUEUE_CAPACITY", "must be greater than 0"));
        }

        WalletKind::try_from(self.polymarket_signature_type)?;

        if !self.dry_run {
            if self.polymarket_private_key.is_empty() {
                return Err(invalid(
                    "POLYMARKET_PRIVATE_KEY",
                    "is required when DRY_RUN=false",
                ));
            }
            if !self.polymarket_private_key.starts_with("0x") {
                return Err(invalid("POLYMARKET_PRIVATE_KEY", "must start with 0x"));
            }
        }

        Ok(())
    }

    /// USDC per entry, raised to the exchange minimum when configured below it.
    pub fn order_value_usdc(&self) -> Decimal {
        self.position_value_usdc.max(MIN_ORDER_USDC)
    }
}
