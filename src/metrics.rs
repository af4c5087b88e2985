//! Prometheus metrics for the flip bot.
//!
//! This module provides metrics for:
//! - Observations accepted and rejected
//! - Intents emitted, by kind
//! - Order fills, failures and latency
//! - Engine evaluation latency
//! - Realized P&L

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

// === Metric Name Constants ===

/// Observations accepted by the engine.
pub const METRIC_OBSERVATIONS: &str = "observations_total";
/// Observations rejected by validation.
pub const METRIC_OBSERVATIONS_REJECTED: &str = "observations_rejected_total";
/// Non-hold intents, labelled by kind.
pub const METRIC_INTENTS: &str = "intents_total";
/// Order legs filled.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Order legs that failed.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Lifecycle errors surfaced at market boundaries.
pub const METRIC_LIFECYCLE_ERRORS: &str = "lifecycle_errors_total";
/// Order placement latency.
pub const METRIC_ORDER_LATENCY: &str = "order_latency_ms";
/// Engine evaluation latency.
pub const METRIC_EVALUATION_LATENCY: &str = "evaluation_latency_ms";
/// Cumulative realized P&L in USDC.
pub const METRIC_REALIZED_PNL: &str = "realized_pnl_usdc";
/// Unrealized P&L of the open position in USDC.
pub const METRIC_UNREALIZED_PNL: &str = "unrealized_pnl_usdc";

/// Register metric descriptions. Call once at startup.
pub fn init_metrics() {
    describe_counter!(METRIC_OBSERVATIONS, "Price observations accepted");
    describe_counter!(
        METRIC_OBSERVATIONS_REJECTED,
        "Price observations rejected by validation"
    );
    describe_counter!(METRIC_INTENTS, "Trade intents emitted by the engine");
    describe_counter!(METRIC_ORDERS_FILLED, "Order legs filled");
    describe_counter!(METRIC_ORDERS_FAILED, "Order legs that failed");
    describe_counter!(
        METRIC_LIFECYCLE_ERRORS,
        "Market attach/detach errors surfaced"
    );
    describe_histogram!(METRIC_ORDER_LATENCY, "Order placement latency in milliseconds");
    describe_histogram!(
        METRIC_EVALUATION_LATENCY,
        "Engine evaluation latency in milliseconds"
    );
    describe_gauge!(METRIC_REALIZED_PNL, "Cumulative realized P&L in USDC");
    describe_gauge!(METRIC_UNREALIZED_PNL, "Unrealized P&L of the open position in USDC");

    debug!("Metrics initialized");
}

/// Install the global Prometheus recorder and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

pub fn inc_observations() {
    counter!(METRIC_OBSERVATIONS).increment(1);
}

pub fn inc_observations_rejected(reason: &'static str) {
    counter!(METRIC_OBSERVATIONS_REJECTED, "reason" => reason).increment(1);
}

pub fn inc_intents(kind: &'static str) {
    counter!(METRIC_INTENTS, "kind" => kind).increment(1);
}

pub fn inc_orders_filled(leg: &'static str) {
    counter!(METRIC_ORDERS_FILLED, "leg" => leg).increment(1);
}

pub fn inc_orders_failed(leg: &'static str) {
    counter!(METRIC_ORDERS_FAILED, "leg" => leg).increment(1);
}

pub fn inc_lifecycle_errors() {
    counter!(METRIC_LIFECYCLE_ERRORS).increment(1);
}

/// Publish P&L gauges. Gauges are f64; money stays `Decimal` everywhere else.
pub fn set_pnl(realized: Decimal, unrealized: Decimal) {
    gauge!(METRIC_REALIZED_PNL).set(realized.to_f64().unwrap_or_default());
    gauge!(METRIC_UNREALIZED_PNL).set(unrealized.to_f64().unwrap_or_default());
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Elapsed time in milliseconds, without recording.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

pub fn timer_evaluation() -> LatencyTimer {
    LatencyTimer::new(METRIC_EVALUATION_LATENCY)
}

pub fn timer_order() -> LatencyTimer {
    LatencyTimer::new(METRIC_ORDER_LATENCY)
}
