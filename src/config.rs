//! Configuration management with validation and defaults
//!
//! `AviatorConfig` is loaded by [`ConfigLoader`] from an optional TOML file,
//! then overridden by `AVIATOR_*` environment variables, then validated.

use crate::{
    errors::{AviatorResult, ConfigurationError},
    games::{
        ledger::BetLimits,
        settlement::CreditRetryPolicy,
        types::{Amount, Multiplier},
    },
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AviatorConfig {
    pub game: GameConfig,
    pub fairness: FairnessConfig,
    pub accounts: AccountsConfig,
    pub history: HistoryConfig,
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

/// Round timing and bet limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub countdown_ms: u64,
    pub tick_interval_ms: u64,
    /// How long a crashed round stays visible before the next one opens
    pub post_crash_delay_ms: u64,
    /// `r` in `exp(r * t)`, per second
    pub growth_rate_per_second: f64,
    pub min_bet_cents: u64,
    pub max_bet_cents: u64,
    pub min_auto_cash_out: f64,
    pub account_timeout_ms: u64,
    pub event_buffer: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown_ms: 5_000,
            tick_interval_ms: 100,
            post_crash_delay_ms: 3_000,
            growth_rate_per_second: 10.0 * 1.01f64.ln(),
            min_bet_cents: 100,
            max_bet_cents: 100_000,
            min_auto_cash_out: 1.01,
            account_timeout_ms: 2_000,
            event_buffer: 1_024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// 300 bps = 97% return to player
    pub house_edge_bps: u32,
    pub max_multiplier: f64,
    /// Hex-encoded secret; a random one is generated when unset
    pub server_secret: Option<String>,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            house_edge_bps: 300,
            max_multiplier: 1_000.0,
            server_secret: None,
        }
    }
}

impl FairnessConfig {
    pub fn max_multiplier(&self) -> Multiplier {
        Multiplier::from_f64(self.max_multiplier).unwrap_or(Multiplier::ONE)
    }
}

/// In-memory account collaborator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub initial_balance_cents: u64,
    pub credit_retry_attempts: u32,
    pub credit_retry_backoff_ms: u64,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            initial_balance_cents: 100_000,
            credit_retry_attempts: 5,
            credit_retry_backoff_ms: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retain_rounds: usize,
    /// JSON Lines file; history is memory-only when unset
    pub file_path: Option<String>,
    pub queue_capacity: usize,
    pub write_attempts: u32,
    pub write_retry_backoff_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retain_rounds: 100,
            file_path: None,
            queue_capacity: 256,
            write_attempts: 3,
            write_retry_backoff_ms: 200,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub log_filter: String,
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "aviator=info,tower_http=info".to_string(),
            enable_metrics: true,
        }
    }
}

impl AviatorConfig {
    /// Local development: verbose logs, JSONL history under ./data
    pub fn development() -> Self {
        Self {
            history: HistoryConfig {
                file_path: Some("./data/rounds.jsonl".to_string()),
                ..Default::default()
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_filter: "aviator=debug,tower_http=debug".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Production: no demo balance, persistent history, tighter timeouts
    pub fn production() -> Self {
        Self {
            game: GameConfig {
                account_timeout_ms: 1_000,
                ..Default::default()
            },
            accounts: AccountsConfig {
                initial_balance_cents: 0,
                credit_retry_attempts: 10,
                credit_retry_backoff_ms: 1_000,
            },
            history: HistoryConfig {
                retain_rounds: 500,
                file_path: Some("./data/rounds.jsonl".to_string()),
                write_attempts: 5,
                ..Default::default()
            },
            server: ServerConfig {
                request_timeout_ms: 5_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let game = &self.game;
        if game.countdown_ms > MAX_PHASE_MS {
            return Err(invalid("game.countdown_ms", game.countdown_ms, "must be <= 3600000"));
        }
        if game.post_crash_delay_ms > MAX_PHASE_MS {
            return Err(invalid("game.post_crash_delay_ms", game.post_crash_delay_ms, "must be <= 3600000"));
        }
        if game.tick_interval_ms == 0 {
            return Err(invalid("game.tick_interval_ms", game.tick_interval_ms, "must be > 0"));
        }
        if !game.growth_rate_per_second.is_finite() || game.growth_rate_per_second <= 0.0 {
            return Err(invalid(
                "game.growth_rate_per_second",
                game.growth_rate_per_second,
                "must be finite and > 0",
            ));
        }
        if game.min_bet_cents == 0 {
            return Err(invalid("game.min_bet_cents", game.min_bet_cents, "must be > 0"));
        }
        if game.max_bet_cents < game.min_bet_cents {
            return Err(ConfigurationError::ValidationFailed(
                "game.max_bet_cents must be >= game.min_bet_cents".to_string(),
            ));
        }
        if !game.min_auto_cash_out.is_finite() || game.min_auto_cash_out <= 1.0 {
            return Err(invalid("game.min_auto_cash_out", game.min_auto_cash_out, "must be > 1.0"));
        }
        if game.account_timeout_ms == 0 {
            return Err(invalid("game.account_timeout_ms", game.account_timeout_ms, "must be > 0"));
        }
        if game.event_buffer == 0 {
            return Err(invalid("game.event_buffer", game.event_buffer, "must be > 0"));
        }

        let fairness = &self.fairness;
        if fairness.house_edge_bps >= 10_000 {
            return Err(invalid("fairness.house_edge_bps", fairness.house_edge_bps, "must be < 10000"));
        }
        if !fairness.max_multiplier.is_finite() || fairness.max_multiplier < 1.01 {
            return Err(invalid("fairness.max_multiplier", fairness.max_multiplier, "must be >= 1.01"));
        }
        if game.max_bet_cents.checked_mul(fairness.max_multiplier().hundredths()).is_none() {
            return Err(ConfigurationError::ValidationFailed(
                "game.max_bet_cents * fairness.max_multiplier overflows".to_string(),
            ));
        }
        if let Some(secret) = &fairness.server_secret {
            if hex::decode(secret.trim()).map(|bytes| bytes.len() < 16).unwrap_or(true) {
                return Err(ConfigurationError::InvalidValue {
                    field: "fairness.server_secret".to_string(),
                    value: "<redacted>".to_string(),
                    reason: "must be hex encoding at least 16 bytes".to_string(),
                });
            }
        }

        if self.history.retain_rounds == 0 {
            return Err(invalid("history.retain_rounds", self.history.retain_rounds, "must be > 0"));
        }
        if self.server.port == 0 {
            return Err(invalid("server.port", self.server.port, "Port cannot be zero"));
        }

        Ok(())
    }

    pub fn bet_limits(&self) -> BetLimits {
        BetLimits {
            min_stake: Amount::from_cents(self.game.min_bet_cents),
            max_stake: Amount::from_cents(self.game.max_bet_cents),
            min_auto_cash_out: Multiplier::from_f64(self.game.min_auto_cash_out)
                .unwrap_or(Multiplier::from_hundredths(101)),
        }
    }

    pub fn credit_retry_policy(&self) -> CreditRetryPolicy {
        CreditRetryPolicy {
            max_attempts: self.accounts.credit_retry_attempts.max(1),
            backoff: Duration::from_millis(self.accounts.credit_retry_backoff_ms),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.game.tick_interval_ms)
    }

    pub fn account_timeout(&self) -> Duration {
        Duration::from_millis(self.game.account_timeout_ms)
    }

    pub fn history_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.history.write_retry_backoff_ms)
    }
}

/// Upper bound for the countdown and the post-crash delay (one hour)
const MAX_PHASE_MS: u64 = 3_600_000;

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    base: Option<AviatorConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Start from a preset instead of the defaults when no file is given
    pub fn with_base(mut self, base: AviatorConfig) -> Self {
        self.base = Some(base);
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> AviatorResult<AviatorConfig> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with a custom environment lookup
    pub fn load_with_env<F>(&self, env: F) -> AviatorResult<AviatorConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => self.base.clone().unwrap_or_default(),
        };

        Self::apply_env_overrides(&mut config, &env)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> AviatorResult<AviatorConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides<F>(config: &mut AviatorConfig, env: &F) -> AviatorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = env("AVIATOR_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_env(env, "AVIATOR_PORT")? {
            config.server.port = port;
        }
        if let Some(secret) = env("AVIATOR_SERVER_SECRET") {
            config.fairness.server_secret = Some(secret);
        }
        if let Some(edge) = parse_env(env, "AVIATOR_HOUSE_EDGE_BPS")? {
            config.fairness.house_edge_bps = edge;
        }
        if let Some(max) = parse_env(env, "AVIATOR_MAX_MULTIPLIER")? {
            config.fairness.max_multiplier = max;
        }
        if let Some(countdown) = parse_env(env, "AVIATOR_COUNTDOWN_MS")? {
            config.game.countdown_ms = countdown;
        }
        if let Some(path) = env("AVIATOR_HISTORY_FILE") {
            config.history.file_path = Some(path);
        }
        if let Some(filter) = env("AVIATOR_LOG_FILTER") {
            config.monitoring.log_filter = filter;
        }
        Ok(())
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> AviatorResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match env(key) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| {
            ConfigurationError::InvalidValue {
                field: key.to_string(),
                value,
                reason: "could not parse value".to_string(),
            }
            .into()
        }),
    }
}
