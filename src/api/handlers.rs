//! HTTP Request Handlers
//!
//! Thin adapters between HTTP and the round scheduler. Every gameplay error
//! is reported synchronously with its stable code; none of them disturb the
//! round timeline.

use super::{
    errors::ApiError,
    middleware::{CallerId, RequestId},
    models::*,
    websocket::WebSocketManager,
};
use crate::{
    games::{
        fairness::{crash_point_from_seed, verify_round, RoundSeed, VerifyError},
        history::RoundHistory,
        scheduler::RoundScheduler,
        settlement::AccountService,
        types::{Multiplier, RoundId},
    },
    metrics::GameMetrics,
    services::ServiceContainer,
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: Arc<RoundScheduler>,
    pub accounts: Arc<dyn AccountService>,
    pub history: Arc<dyn RoundHistory>,
    pub metrics: Arc<GameMetrics>,
    pub ws: WebSocketManager,
    pub house_edge_bps: u32,
    pub max_multiplier: Multiplier,
    pub enable_metrics: bool,
}

impl AppState {
    pub fn from_services(services: &ServiceContainer) -> Self {
        let config = services.config();
        Self {
            scheduler: services.scheduler(),
            accounts: services.accounts(),
            history: services.history(),
            metrics: services.metrics(),
            ws: WebSocketManager::new(services.scheduler(), services.metrics()),
            house_edge_bps: config.fairness.house_edge_bps,
            max_multiplier: config.fairness.max_multiplier(),
            enable_metrics: config.monitoring.enable_metrics,
        }
    }
}

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        round_id: state.scheduler.current_round_id().await,
        uptime_seconds: state.metrics.uptime_seconds(),
    })
}

/// Snapshot of the active round
pub async fn current_round_handler(State(state): State<Arc<AppState>>) -> Json<CurrentRoundResponse> {
    let round = state.scheduler.snapshot().await;
    let server_time_iso = to_datetime(round.server_time);
    Json(CurrentRoundResponse { round, server_time_iso })
}

/// Place a bet on the Waiting round
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Json(request): Json<PlaceBetRequest>,
) -> Result<Json<PlaceBetResponse>, ApiError> {
    let (stake, auto_cash_out) = request
        .parse(state.scheduler.limits())
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    let bet = state
        .scheduler
        .place_bet(&user_id, stake, auto_cash_out, request.round_id)
        .await
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    debug!(request_id = %request_id.0, bet_id = bet.id, "Bet accepted");
    Ok(Json(bet.into()))
}

/// Manual cash-out at the server-computed multiplier
pub async fn cash_out_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
    Json(request): Json<CashOutRequest>,
) -> Result<Json<CashOutResponse>, ApiError> {
    let record = state
        .scheduler
        .cash_out(&user_id, request.bet_id, request.observed())
        .await
        .map_err(|e| ApiError::game(request_id.0, e))?;

    Ok(Json(record.into()))
}

/// Recent crash points, newest first
pub async fn history_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);

    let rounds = state.history.recent_rounds(limit).await.map_err(|e| {
        error!(request_id = %request_id.0, "History read failed: {}", e);
        ApiError::internal_error(request_id.0.clone(), "Failed to read round history".to_string())
    })?;

    Ok(Json(HistoryResponse {
        rounds: rounds.into_iter().map(HistoryEntry::from).collect(),
    }))
}

/// Full record of a finished round
pub async fn round_detail_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> Result<Json<RoundDetailResponse>, ApiError> {
    let record = state.history.load_round(round_id).await.map_err(|e| {
        error!(request_id = %request_id.0, round_id, "History read failed: {}", e);
        ApiError::internal_error(request_id.0.clone(), "Failed to read round history".to_string())
    })?;

    match record {
        Some(record) => Ok(Json(RoundDetailResponse::new(
            record,
            state.house_edge_bps,
            state.max_multiplier,
        ))),
        None => Err(ApiError::not_found(
            request_id.0,
            format!("Round {} not found or not finished", round_id),
        )),
    }
}

/// Recompute a crash point from a revealed seed
pub async fn verify_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let (valid, crash_point) = match verify_round(
        &request.seed,
        request.seed_hash.as_deref(),
        state.house_edge_bps,
        state.max_multiplier,
    ) {
        Ok(crash_point) => (true, crash_point),
        Err(VerifyError::CommitmentMismatch { .. }) => {
            let seed = RoundSeed::from_hex(&request.seed)
                .map_err(|e| ApiError::bad_request(request_id.0.clone(), e.to_string()))?;
            (false, crash_point_from_seed(&seed, state.house_edge_bps, state.max_multiplier))
        }
        Err(e @ VerifyError::InvalidSeed(_)) => {
            return Err(ApiError::bad_request(request_id.0, e.to_string()));
        }
    };

    let seed_hash = RoundSeed::from_hex(&request.seed)
        .map(|seed| seed.commitment())
        .map_err(|e| ApiError::bad_request(request_id.0.clone(), e.to_string()))?;

    Ok(Json(VerifyResponse {
        valid,
        crash_point,
        seed_hash,
        house_edge_bps: state.house_edge_bps,
        max_multiplier: state.max_multiplier,
    }))
}

/// Caller's balance from the account service
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    CallerId(user_id): CallerId,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .accounts
        .balance(&user_id)
        .await
        .map_err(|e| ApiError::game(request_id.0, e.into()))?;

    Ok(Json(BalanceResponse {
        user_id,
        balance,
        balance_display: balance.to_string(),
    }))
}

/// Prometheus text exposition
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.enable_metrics {
        return Err(ApiError::not_found(request_id.0, "Metrics are disabled".to_string()));
    }

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus_format(),
    ))
}
