//! Aviator game server binary
//!
//! Loads configuration, starts the round engine and serves the HTTP and
//! WebSocket API until Ctrl+C or SIGTERM.

use aviator::{api::ApiServer, AviatorConfig, ConfigLoader, ServiceBuilder};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    Default,
    Development,
    Production,
}

#[derive(Parser, Debug)]
#[command(name = "aviator")]
#[command(about = "Aviator crash-game round server", long_about = None)]
struct Args {
    /// TOML configuration file (overrides --preset)
    #[arg(short, long)]
    config: Option<String>,

    /// Built-in configuration preset
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// Listen port (overrides configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Listen host (overrides configuration)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let base = match args.preset {
        Preset::Default => AviatorConfig::default(),
        Preset::Development => AviatorConfig::development(),
        Preset::Production => AviatorConfig::production(),
    };
    let mut loader = ConfigLoader::new().with_base(base);
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_filter)),
        )
        .init();

    info!("🚀 Starting Aviator game server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "   Countdown: {}ms, tick: {}ms, post-crash delay: {}ms",
        config.game.countdown_ms, config.game.tick_interval_ms, config.game.post_crash_delay_ms
    );
    info!(
        "   House edge: {}bps, max multiplier: {}",
        config.fairness.house_edge_bps,
        config.fairness.max_multiplier()
    );

    let mut services = ServiceBuilder::new().with_config(config).build().await?;
    services.start();

    let result = ApiServer::new(&services).run().await;

    services.shutdown().await;
    result
}
