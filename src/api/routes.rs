//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Gameplay
        .route("/api/game/current", get(current_round_handler))
        .route("/api/game/bet", post(place_bet_handler))
        .route("/api/game/cashout", post(cash_out_handler))
        // Archive
        .route("/api/game/history", get(history_handler))
        .route("/api/game/rounds/:round_id", get(round_detail_handler))
        .route("/api/fairness/verify", post(verify_handler))
        .route("/api/balance", get(balance_handler))
        // Real-time round events and commands
        .route("/ws", get(websocket_handler))
        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
