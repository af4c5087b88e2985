//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{health, metrics, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::StatusSnapshot;
    use crate::engine::{OpenPosition, PositionState};
    use crate::market::Outcome;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use time::macros::datetime;
    use tower::ServiceExt;

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get(create_router(AppState::new()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn ready_endpoint_returns_503_when_not_ready() {
        let (status, _) = get(create_router(AppState::new()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_endpoint_returns_200_when_attached() {
        let state = AppState::new();
        state.set_market(Some("btc-updown-15m-1".to_string())).await;

        let (status, body) = get(create_router(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["market"], "btc-updown-15m-1");
    }

    #[tokio::test]
    async fn status_reports_position_and_pnl() {
        let state = AppState::new();
        state
            .publish(StatusSnapshot {
                dry_run: true,
                position: PositionState::Holding(OpenPosition {
                    side: Outcome::Up,
                    entry_price: dec!(0.5),
                    size_usdc: dec!(10),
                    shares: dec!(20),
                    entry_time: datetime!(2025-01-01 0:00 UTC),
                    market_slug: "m".to_string(),
                }),
                unrealized_pnl: dec!(0.4),
                cumulative_pnl: dec!(1.25),
                ..Default::default()
            })
            .await;

        let (status, body) = get(create_router(state), "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "waiting");
        assert_eq!(body["position"]["state"], "holding");
        assert_eq!(body["position"]["side"], "up");
        assert_eq!(body["cumulative_pnl"], "1.25");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let (status, _) = get(create_router(AppState::new()), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
