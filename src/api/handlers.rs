//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::engine::PositionState;
use crate::ledger::LedgerStats;

/// Trader state as last published, served by `/api/v1/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub dry_run: bool,
    pub position: PositionState,
    pub unrealized_pnl: Decimal,
    pub cumulative_pnl: Decimal,
    pub last_up_price: Option<Decimal>,
    pub last_down_price: Option<Decimal>,
    pub ledger: LedgerStats,
}

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Whether a market is attached.
    pub ready: Arc<AtomicBool>,
    /// Current market slug.
    pub market_slug: Arc<RwLock<Option<String>>>,
    /// Latest trader snapshot.
    pub status: Arc<RwLock<StatusSnapshot>>,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            market_slug: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(StatusSnapshot::default())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Mark a market attached (`Some`) or detached (`None`).
    pub async fn set_market(&self, slug: Option<String>) {
        self.set_ready(slug.is_some());
        *self.market_slug.write().await = slug;
    }

    pub async fn publish(&self, snapshot: StatusSnapshot) {
        *self.status.write().await = snapshot;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub market: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// "running" once a market is attached, "waiting" otherwise.
    pub status: &'static str,
    pub market: Option<String>,
    #[serde(flatten)]
    pub trader: StatusSnapshot,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - 200 while a market is attached, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let market = state.market_slug.read().await.clone();

    let response = ReadyResponse {
        ready: is_ready,
        market,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let market = state.market_slug.read().await.clone();
    let trader = state.status.read().await.clone();
    let status = if state.is_ready() { "running" } else { "waiting" };

    Json(StatusResponse {
        status,
        market,
        trader,
    })
}

/// Prometheus text exposition; 404 when no recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::from("metrics recorder not installed")),
    }
}
