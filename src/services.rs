//! Service layer wiring the engine and its collaborators
//!
//! `ServiceBuilder` lets tests swap the clock, crash source, account store and
//! history store; the binary uses the defaults derived from configuration.

use crate::{
    clock::{Clock, SystemClock},
    config::AviatorConfig,
    errors::AviatorResult,
    games::{
        events::EventPublisher,
        fairness::{CrashGenerator, CrashPointSource},
        history::{HistoryWriter, InMemoryHistory, JsonlHistory, RoundHistory},
        scheduler::{RoundScheduler, SchedulerSettings},
        settlement::{AccountService, InMemoryAccounts, SettlementEngine},
        types::Amount,
    },
    metrics::GameMetrics,
};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{info, warn};

const CREDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the transport layer needs
pub struct ServiceContainer {
    config: AviatorConfig,
    scheduler: Arc<RoundScheduler>,
    accounts: Arc<dyn AccountService>,
    history: Arc<dyn RoundHistory>,
    metrics: Arc<GameMetrics>,
    background: Vec<JoinHandle<()>>,
}

impl ServiceContainer {
    pub fn config(&self) -> &AviatorConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Arc<RoundScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn accounts(&self) -> Arc<dyn AccountService> {
        Arc::clone(&self.accounts)
    }

    pub fn history(&self) -> Arc<dyn RoundHistory> {
        Arc::clone(&self.history)
    }

    pub fn metrics(&self) -> Arc<GameMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Start the tick loop
    pub fn start(&mut self) {
        self.background.push(self.scheduler.spawn());
        info!("Game services started");
    }

    /// Stop the tick loop, give queued credits a bounded chance to land,
    /// then abort background tasks
    pub async fn shutdown(&mut self) {
        self.scheduler.stop();

        let settlement = self.scheduler.settlement();
        if timeout(CREDIT_DRAIN_TIMEOUT, settlement.wait_for_credits()).await.is_err() {
            warn!(pending = settlement.pending_credits(), "Shutting down with undelivered credits");
        }

        for handle in self.background.drain(..) {
            handle.abort();
        }
        info!("Game services stopped");
    }
}

/// Builder for configured service containers
#[derive(Default)]
pub struct ServiceBuilder {
    config: Option<AviatorConfig>,
    clock: Option<Arc<dyn Clock>>,
    crash_source: Option<Arc<dyn CrashPointSource>>,
    accounts: Option<Arc<dyn AccountService>>,
    history: Option<Arc<dyn RoundHistory>>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: AviatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the clock (useful for testing)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the crash point source (useful for testing)
    pub fn with_crash_source(mut self, source: Arc<dyn CrashPointSource>) -> Self {
        self.crash_source = Some(source);
        self
    }

    pub fn with_accounts(mut self, accounts: Arc<dyn AccountService>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn RoundHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Build the container and spawn its history and credit workers.
    /// Must run inside a tokio runtime.
    pub async fn build(self) -> AviatorResult<ServiceContainer> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let metrics = Arc::new(GameMetrics::new());
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let crash_source: Arc<dyn CrashPointSource> = match self.crash_source {
            Some(source) => source,
            None => Arc::new(CrashGenerator::from_config(&config.fairness)?),
        };
        let accounts: Arc<dyn AccountService> = self.accounts.unwrap_or_else(|| {
            Arc::new(InMemoryAccounts::new(Amount::from_cents(
                config.accounts.initial_balance_cents,
            )))
        });
        let history: Arc<dyn RoundHistory> = match (self.history, &config.history.file_path) {
            (Some(history), _) => history,
            (None, Some(path)) => Arc::new(JsonlHistory::open(path, config.history.retain_rounds).await?),
            (None, None) => Arc::new(InMemoryHistory::new(config.history.retain_rounds)),
        };

        let (writer, writer_handle) = HistoryWriter::spawn(
            history.clone(),
            config.history.queue_capacity,
            config.history.write_attempts,
            config.history_retry_backoff(),
            metrics.clone(),
        );

        let settlement = Arc::new(SettlementEngine::new(
            accounts.clone(),
            config.account_timeout(),
            config.credit_retry_policy(),
            metrics.clone(),
        ));
        let mut background = vec![writer_handle];
        background.extend(settlement.spawn_credit_worker());

        let scheduler = Arc::new(RoundScheduler::new(
            SchedulerSettings::from_config(&config),
            clock,
            crash_source,
            settlement,
            EventPublisher::new(config.game.event_buffer),
            Some(writer),
            metrics.clone(),
        ));

        Ok(ServiceContainer {
            config,
            scheduler,
            accounts,
            history,
            metrics,
            background,
        })
    }
}
