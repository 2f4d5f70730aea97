//! Round scheduler: the single authoritative timeline.
//!
//! One active round lives behind one `tokio::sync::Mutex`. Every operation
//! (tick, placement, cash-out, snapshot) takes the lock, first syncs the round
//! to the clock, then acts. Account I/O never happens under the lock: stake
//! debits run on the placement task, credits are queued to the settlement
//! worker.

use crate::{
    clock::Clock,
    config::AviatorConfig,
    errors::GameError,
    games::{
        events::{EventPublisher, RoundStateEvent},
        fairness::CrashPointSource,
        growth::GrowthCurve,
        history::HistoryWriter,
        ledger::{BetLedger, BetLimits},
        round::{RoundStateMachine, Transition},
        settlement::{SettlementEngine, SettlementRecord},
        types::{Amount, Bet, BetId, Millis, Multiplier, RoundId, RoundSnapshot, RoundStatus},
    },
    metrics::GameMetrics,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub countdown_ms: u64,
    pub post_crash_delay_ms: u64,
    pub tick_interval: Duration,
    pub curve: GrowthCurve,
    pub limits: BetLimits,
}

impl SchedulerSettings {
    pub fn from_config(config: &AviatorConfig) -> Self {
        Self {
            countdown_ms: config.game.countdown_ms,
            post_crash_delay_ms: config.game.post_crash_delay_ms,
            tick_interval: config.tick_interval(),
            curve: GrowthCurve::new(config.game.growth_rate_per_second),
            limits: config.bet_limits(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AviatorConfig::default())
    }
}

struct ActiveRound {
    machine: RoundStateMachine,
    ledger: BetLedger,
    archived: bool,
}

pub struct RoundScheduler {
    settings: SchedulerSettings,
    clock: Arc<dyn Clock>,
    crash_source: Arc<dyn CrashPointSource>,
    settlement: Arc<SettlementEngine>,
    events: EventPublisher,
    history: Option<HistoryWriter>,
    metrics: Arc<GameMetrics>,
    active: Mutex<ActiveRound>,
    next_bet_id: AtomicU64,
    running: AtomicBool,
}

impl RoundScheduler {
    pub fn new(
        settings: SchedulerSettings,
        clock: Arc<dyn Clock>,
        crash_source: Arc<dyn CrashPointSource>,
        settlement: Arc<SettlementEngine>,
        events: EventPublisher,
        history: Option<HistoryWriter>,
        metrics: Arc<GameMetrics>,
    ) -> Self {
        let now = clock.now_ms();
        let first = open_round(&settings, crash_source.as_ref(), &events, 1, now);

        Self {
            settings,
            clock,
            crash_source,
            settlement,
            events,
            history,
            metrics,
            active: Mutex::new(first),
            next_bet_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RoundStateEvent> {
        self.events.subscribe()
    }

    pub fn settlement(&self) -> &Arc<SettlementEngine> {
        &self.settlement
    }

    pub fn limits(&self) -> &BetLimits {
        &self.settings.limits
    }

    /// Place a bet on the Waiting round.
    ///
    /// Phase 1 reserves the user's slot under the lock, phase 2 debits the
    /// stake without the lock, phase 3 commits if the round is still
    /// Waiting and refunds otherwise.
    ///
    /// The phases run on their own task. A caller that goes away mid-debit
    /// still leaves either a committed bet or a released slot and a refund.
    pub async fn place_bet(
        self: &Arc<Self>,
        user_id: &str,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        round_id: Option<RoundId>,
    ) -> Result<Bet, GameError> {
        let scheduler = Arc::clone(self);
        let user_id = user_id.to_string();

        let placement = tokio::spawn(async move {
            let result = scheduler
                .place_bet_inner(&user_id, stake, auto_cash_out, round_id)
                .await;
            if let Err(e) = &result {
                scheduler.metrics.record_bet_rejected();
                debug!(user_id = %user_id, stake = %stake, code = e.code(), "Bet rejected: {}", e);
            }
            result
        });

        placement
            .await
            .unwrap_or_else(|e| Err(GameError::AccountUnavailable(format!("bet placement aborted: {}", e))))
    }

    async fn place_bet_inner(
        &self,
        user_id: &str,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        requested_round: Option<RoundId>,
    ) -> Result<Bet, GameError> {
        self.settings.limits.validate(stake, auto_cash_out)?;

        let round_id = {
            let mut active = self.active.lock().await;
            self.sync(&mut active, self.clock.now_ms());
            let active_id = active.machine.round_id();

            let reserved = match requested_round {
                Some(id) if id < active_id => Err(GameError::RoundClosed { round_id: id }),
                Some(id) if id > active_id => Err(GameError::RoundNotAcceptingBets { round_id: id }),
                _ => {
                    let ActiveRound { machine, ledger, .. } = &mut *active;
                    ledger.reserve(machine, user_id)
                }
            };
            reserved.map(|_| active_id)
        }?;

        if let Err(e) = self.settlement.debit_stake(user_id, stake).await {
            let mut active = self.active.lock().await;
            if active.machine.round_id() == round_id {
                active.ledger.release(user_id);
            }
            return Err(e);
        }

        let mut active = self.active.lock().await;
        let now = self.clock.now_ms();
        self.sync(&mut active, now);

        let committed = if active.machine.round_id() != round_id {
            Err(GameError::RoundClosed { round_id })
        } else {
            let bet_id = self.next_bet_id.fetch_add(1, Ordering::SeqCst);
            let ActiveRound { machine, ledger, .. } = &mut *active;
            ledger.commit(machine, bet_id, user_id, stake, auto_cash_out, now)
        };

        match &committed {
            Ok(bet) => {
                self.metrics.record_bet_placed(bet.stake);
                self.events.publish(RoundStateEvent::bet_placed(bet));
            }
            Err(_) => {
                warn!(user_id = %user_id, round_id, stake = %stake, "Bet rejected after debit, refunding stake");
                self.settlement.queue_refund(user_id, stake);
            }
        }
        committed
    }

    /// Manual cash-out at the multiplier computed when the lock is acquired
    pub async fn cash_out(
        &self,
        user_id: &str,
        bet_id: BetId,
        observed: Option<Multiplier>,
    ) -> Result<SettlementRecord, GameError> {
        let mut active = self.active.lock().await;
        let now = self.clock.now_ms();
        self.sync(&mut active, now);

        let ActiveRound { machine, ledger, .. } = &mut *active;
        let record = ledger.request_cash_out(machine, &self.settlement, user_id, bet_id, observed, now)?;
        self.settlement.queue_payout(&record);
        if let Some(event) = RoundStateEvent::cashed_out(&record) {
            self.events.publish(event);
        }
        Ok(record)
    }

    /// Advance the timeline to now and publish a tick while Running
    pub async fn tick(&self) {
        let mut active = self.active.lock().await;
        let now = self.clock.now_ms();
        self.sync(&mut active, now);

        if active.machine.status() == RoundStatus::Running {
            self.events.publish(RoundStateEvent::MultiplierTick {
                round_id: active.machine.round_id(),
                multiplier: active.machine.current_multiplier(now),
                elapsed_ms: active.machine.elapsed_ms(now),
            });
        }
    }

    /// Immutable view of the active round at now
    pub async fn snapshot(&self) -> RoundSnapshot {
        let mut active = self.active.lock().await;
        let now = self.clock.now_ms();
        self.sync(&mut active, now);
        let machine = &active.machine;

        RoundSnapshot {
            round_id: machine.round_id(),
            status: machine.status(),
            multiplier: machine.current_multiplier(now),
            elapsed_ms: machine.elapsed_ms(now),
            countdown_ends_at: machine.countdown_ends_at(),
            started_at: machine.started_at(),
            crashed_at: machine.crashed_at(),
            crash_point: machine.revealed_crash_point(),
            seed_hash: machine.seed_hash().to_string(),
            seed: machine.revealed_seed(),
            bets: active.ledger.bets(),
            server_time: now,
        }
    }

    pub async fn current_round_id(&self) -> RoundId {
        self.active.lock().await.machine.round_id()
    }

    /// Start the tick loop on its own task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let scheduler = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.settings.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(tick_ms = scheduler.settings.tick_interval.as_millis() as u64, "Round scheduler started");

            while scheduler.running.load(Ordering::SeqCst) {
                interval.tick().await;
                scheduler.tick().await;
            }
            info!("Round scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Bring the active round up to `now`: fire transitions, settle auto
    /// cash-outs, run the crash sweep, archive, and open the next round once
    /// the post-crash delay has passed. Winning records are queued for credit.
    fn sync(&self, active: &mut ActiveRound, now: Millis) {
        let transitions = active.machine.advance(now);
        for transition in &transitions {
            if let Transition::Started { round_id, started_at } = *transition {
                info!(round_id, bets = active.ledger.len(), "Round started");
                self.metrics.record_round_started();
                self.events.publish(RoundStateEvent::RoundStarted { round_id, started_at });
            }
        }

        if let Some(ceiling) = active.machine.highest_settleable(now) {
            let ActiveRound { machine, ledger, .. } = &mut *active;
            for record in ledger.resolve_auto_cashouts(machine, &self.settlement, ceiling) {
                self.settlement.queue_payout(&record);
                if let Some(event) = RoundStateEvent::cashed_out(&record) {
                    self.events.publish(event);
                }
            }
        }

        if let Some(crashed_at) = active.machine.crashed_at() {
            if !active.archived {
                self.finish_round(active, crashed_at);
            }
            if now >= crashed_at.saturating_add(self.settings.post_crash_delay_ms) {
                let next_id = active.machine.round_id() + 1;
                *active = open_round(&self.settings, self.crash_source.as_ref(), &self.events, next_id, now);
            }
        }
    }

    fn finish_round(&self, active: &mut ActiveRound, crashed_at: Millis) {
        let ActiveRound { machine, ledger, archived } = active;
        ledger.settle_losses(machine, &self.settlement);
        debug_assert!(ledger.pending_ids().is_empty());
        *archived = true;

        let Some(record) = machine.archive(ledger.bets()) else {
            return;
        };
        info!(
            round_id = record.round_id,
            crash_point = %record.crash_point,
            bets = record.bets.len(),
            staked = %record.total_staked,
            paid_out = %record.total_paid_out,
            "Round crashed"
        );

        self.metrics.record_round_crashed(record.crash_point);
        self.events.publish(RoundStateEvent::RoundCrashed {
            round_id: record.round_id,
            crash_point: record.crash_point,
            crashed_at,
            seed: record.seed.clone(),
        });
        if let Some(history) = &self.history {
            history.submit(record);
        }
    }
}

fn open_round(
    settings: &SchedulerSettings,
    crash_source: &dyn CrashPointSource,
    events: &EventPublisher,
    round_id: RoundId,
    now: Millis,
) -> ActiveRound {
    let (seed, crash_point) = crash_source.generate(round_id);
    let countdown_ends_at = now.saturating_add(settings.countdown_ms);
    let machine = RoundStateMachine::new(round_id, seed, crash_point, settings.curve, countdown_ends_at);

    info!(round_id, seed_hash = %machine.seed_hash(), countdown_ends_at, "Waiting for bets");
    events.publish(RoundStateEvent::WaitingStarted {
        round_id,
        seed_hash: machine.seed_hash().to_string(),
        countdown_ends_at,
    });

    ActiveRound {
        machine,
        ledger: BetLedger::new(round_id),
        archived: false,
    }
}
