//! WebSocket Support for Real-time Round Events
//!
//! Each connection receives:
//! - a snapshot of the active round on connect (and again after lagging)
//! - every `RoundStateEvent` published by the scheduler
//! - `command_result` replies to its own `place_bet` / `cash_out` commands

use super::{errors::ErrorBody, handlers::AppState, models::parse_bet_values};
use crate::{
    errors::GameError,
    games::{
        scheduler::RoundScheduler,
        settlement::SettlementRecord,
        types::{Bet, BetId, Millis, Multiplier, RoundId, RoundSnapshot},
    },
    metrics::GameMetrics,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::SplitSink,
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, error, info, warn};

/// Commands a client may send over the socket
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsCommand {
    PlaceBet {
        amount: f64,
        #[serde(default)]
        auto_cash_out: Option<f64>,
        #[serde(default)]
        round_id: Option<RoundId>,
        #[serde(default)]
        request_id: Option<String>,
    },
    CashOut {
        bet_id: BetId,
        #[serde(default)]
        observed_multiplier: Option<f64>,
        #[serde(default)]
        request_id: Option<String>,
    },
    Ping,
}

/// Messages addressed to a single connection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsReply {
    Snapshot {
        round: RoundSnapshot,
    },
    CommandResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        bet: Option<Bet>,
        #[serde(skip_serializing_if = "Option::is_none")]
        settlement: Option<SettlementRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    Pong {
        server_time: Millis,
    },
    Error {
        message: String,
    },
}

impl WsReply {
    fn failed(request_id: Option<String>, error: ErrorBody) -> Self {
        WsReply::CommandResult {
            request_id,
            ok: false,
            bet: None,
            settlement: None,
            error: Some(error),
        }
    }

    fn game_error(request_id: Option<String>, err: &GameError) -> Self {
        Self::failed(request_id, ErrorBody::from(err))
    }
}

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Required to send commands; read-only spectators may omit it
    #[serde(default)]
    pub user_id: Option<String>,
}

/// WebSocket connection manager
#[derive(Clone)]
pub struct WebSocketManager {
    scheduler: Arc<RoundScheduler>,
    metrics: Arc<GameMetrics>,
}

impl WebSocketManager {
    pub fn new(scheduler: Arc<RoundScheduler>, metrics: Arc<GameMetrics>) -> Self {
        Self { scheduler, metrics }
    }

    /// Handle WebSocket upgrade
    pub fn handle_upgrade(&self, ws: WebSocketUpgrade, user_id: Option<String>) -> Response {
        let manager = self.clone();
        ws.on_upgrade(move |socket| async move { manager.handle_connection(socket, user_id).await })
    }

    async fn handle_connection(&self, socket: WebSocket, user_id: Option<String>) {
        let clients = self.metrics.ws_client_connected();
        info!(user_id = ?user_id, clients, "🔌 WebSocket client connected");

        let (mut sender, mut receiver) = socket.split();
        let mut events = self.scheduler.subscribe();
        let (reply_tx, mut reply_rx) = mpsc::channel::<WsReply>(32);

        let snapshot = WsReply::Snapshot {
            round: self.scheduler.snapshot().await,
        };
        if send_json(&mut sender, &snapshot).await.is_err() {
            self.disconnected(&user_id);
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            if send_json(&mut sender, &event).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "WebSocket client lagged, resending snapshot");
                            let snapshot = WsReply::Snapshot { round: scheduler.snapshot().await };
                            if send_json(&mut sender, &snapshot).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                    reply = reply_rx.recv() => match reply {
                        Some(reply) => {
                            if send_json(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let manager = self.clone();
        let command_user = user_id.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = receiver.next().await {
                match message {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<WsCommand>(&text) {
                            Ok(command) => manager.execute(command, command_user.as_deref()).await,
                            Err(e) => WsReply::Error {
                                message: format!("Invalid command: {}", e),
                            },
                        };
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        self.disconnected(&user_id);
    }

    fn disconnected(&self, user_id: &Option<String>) {
        let clients = self.metrics.ws_client_disconnected();
        info!(user_id = ?user_id, clients, "🔌 WebSocket client disconnected");
    }

    /// Run one client command against the scheduler
    pub async fn execute(&self, command: WsCommand, user_id: Option<&str>) -> WsReply {
        let (request_id, user_id) = match (&command, user_id) {
            (WsCommand::Ping, _) => {
                return WsReply::Pong {
                    server_time: self.scheduler.snapshot().await.server_time,
                }
            }
            (WsCommand::PlaceBet { request_id, .. } | WsCommand::CashOut { request_id, .. }, None) => {
                return WsReply::failed(
                    request_id.clone(),
                    ErrorBody {
                        code: "UNAUTHENTICATED".to_string(),
                        message: "Connect with a user_id to send commands".to_string(),
                        details: None,
                    },
                );
            }
            (WsCommand::PlaceBet { request_id, .. } | WsCommand::CashOut { request_id, .. }, Some(user)) => {
                (request_id.clone(), user)
            }
        };

        match command {
            WsCommand::PlaceBet {
                amount,
                auto_cash_out,
                round_id,
                ..
            } => {
                let parsed = parse_bet_values(amount, auto_cash_out, self.scheduler.limits());
                let result = match parsed {
                    Ok((stake, auto)) => self.scheduler.place_bet(user_id, stake, auto, round_id).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(bet) => WsReply::CommandResult {
                        request_id,
                        ok: true,
                        bet: Some(bet),
                        settlement: None,
                        error: None,
                    },
                    Err(e) => WsReply::game_error(request_id, &e),
                }
            }
            WsCommand::CashOut {
                bet_id,
                observed_multiplier,
                ..
            } => {
                let observed = observed_multiplier.and_then(Multiplier::from_f64);
                match self.scheduler.cash_out(user_id, bet_id, observed).await {
                    Ok(record) => WsReply::CommandResult {
                        request_id,
                        ok: true,
                        bet: None,
                        settlement: Some(record),
                        error: None,
                    },
                    Err(e) => WsReply::game_error(request_id, &e),
                }
            }
            WsCommand::Ping => WsReply::Pong {
                server_time: self.scheduler.snapshot().await.server_time,
            },
        }
    }
}

async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            error!("Failed to serialize WebSocket message: {}", e);
            Ok(())
        }
    }
}

/// WebSocket endpoint handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    debug!(user_id = ?params.user_id, "WebSocket upgrade requested");
    state.ws.handle_upgrade(ws, params.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        games::{fairness::CrashPointSource, fairness::RoundSeed, types::Amount},
        services::ServiceBuilder,
    };

    struct FixedCrash;

    impl CrashPointSource for FixedCrash {
        fn generate(&self, _round_id: RoundId) -> (RoundSeed, Multiplier) {
            (RoundSeed::from_bytes([7; 32]), Multiplier::from_hundredths(200))
        }
    }

    async fn manager() -> (WebSocketManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let services = ServiceBuilder::new()
            .with_clock(clock.clone())
            .with_crash_source(Arc::new(FixedCrash))
            .build()
            .await
            .unwrap();
        (WebSocketManager::new(services.scheduler(), services.metrics()), clock)
    }

    #[test]
    fn test_command_parsing() {
        let command: WsCommand =
            serde_json::from_str(r#"{"type":"place_bet","amount":10.0,"auto_cash_out":2.0}"#).unwrap();
        assert!(matches!(command, WsCommand::PlaceBet { auto_cash_out: Some(_), .. }));

        let command: WsCommand = serde_json::from_str(r#"{"type":"cash_out","bet_id":3}"#).unwrap();
        assert!(matches!(command, WsCommand::CashOut { bet_id: 3, .. }));
    }

    #[tokio::test]
    async fn test_place_bet_command() {
        let (manager, _clock) = manager().await;
        let reply = manager
            .execute(
                WsCommand::PlaceBet {
                    amount: 10.0,
                    auto_cash_out: None,
                    round_id: None,
                    request_id: Some("r-1".to_string()),
                },
                Some("alice"),
            )
            .await;

        match reply {
            WsReply::CommandResult { request_id, ok, bet, .. } => {
                assert!(ok);
                assert_eq!(request_id.as_deref(), Some("r-1"));
                assert_eq!(bet.unwrap().stake, Amount::from_cents(1_000));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_require_user() {
        let (manager, _clock) = manager().await;
        let reply = manager
            .execute(
                WsCommand::CashOut {
                    bet_id: 1,
                    observed_multiplier: None,
                    request_id: None,
                },
                None,
            )
            .await;

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "command_result");
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_cash_out_before_start_is_rejected() {
        let (manager, _clock) = manager().await;
        let placed = manager
            .execute(
                WsCommand::PlaceBet {
                    amount: 10.0,
                    auto_cash_out: None,
                    round_id: None,
                    request_id: None,
                },
                Some("bob"),
            )
            .await;
        let bet_id = match placed {
            WsReply::CommandResult { bet: Some(bet), .. } => bet.id,
            other => panic!("unexpected reply: {:?}", other),
        };

        let reply = manager
            .execute(
                WsCommand::CashOut {
                    bet_id,
                    observed_multiplier: Some(1.5),
                    request_id: None,
                },
                Some("bob"),
            )
            .await;
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["error"]["code"], "ROUND_NOT_STARTED");
    }
}
