//! API Server
//!
//! Axum server setup with the shared middleware stack and graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_counter_middleware, request_id_middleware},
    routes::create_router,
};
use crate::{config::ServerConfig, services::ServiceContainer};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

/// HTTP + WebSocket front end for one game engine
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(services: &ServiceContainer) -> Self {
        Self {
            config: services.config().server.clone(),
            state: Arc::new(AppState::from_services(services)),
        }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.get_socket_addr()?;
        let app = create_app(Arc::clone(&self.state), &self.config);

        info!("🌐 Starting Aviator API Server");
        info!("   Listen: http://{}", addr);
        self.log_server_info();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("✅ API Server running");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 API Server stopped gracefully");
        Ok(())
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self) {
        info!("📋 Server Configuration:");
        info!("   Version: {}", env!("CARGO_PKG_VERSION"));
        info!("   CORS: {:?}", self.config.cors_origins);
        info!("   Request timeout: {}ms", self.config.request_timeout_ms);
        info!("   Metrics enabled: {}", self.state.enable_metrics);

        info!("📊 Available endpoints:");
        info!("   GET  /health                  - Health check");
        info!("   GET  /api/game/current        - Active round snapshot");
        info!("   POST /api/game/bet            - Place a bet");
        info!("   POST /api/game/cashout        - Cash out a bet");
        info!("   GET  /api/game/history        - Recent crash points");
        info!("   GET  /api/game/rounds/:id     - Archived round");
        info!("   POST /api/fairness/verify     - Verify a revealed seed");
        info!("   GET  /api/balance             - Caller balance");
        info!("   GET  /ws                      - Round event stream");
    }
}

/// Build the router with the middleware stack applied
pub fn create_app(state: Arc<AppState>, config: &ServerConfig) -> axum::Router {
    let metrics = Arc::clone(&state.metrics);

    create_router(state)
        .layer(axum::middleware::from_fn_with_state(metrics, request_counter_middleware))
        // Request ID middleware (handlers and extractors read it)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(create_cors_layer(config.cors_origins.clone()))
        .layer(TimeoutLayer::new(config.request_timeout()))
        // Tracing layer (outermost for complete request tracing)
        .layer(TraceLayer::new_for_http())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
