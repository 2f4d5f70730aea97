//! End-to-end round lifecycle through the service container
//!
//! Drives a full round with a manual clock: countdown, bets, growth,
//! cash-outs, crash sweep, archive and rotation to the next round.

use async_trait::async_trait;
use aviator::{
    clock::ManualClock,
    games::{
        fairness::{verify_round, CrashGenerator, CrashPointSource, RoundSeed},
        growth::GrowthCurve,
        settlement::{AccountError, AccountService, InMemoryAccounts},
        types::{Amount, BetOutcome, CashOutTrigger, Multiplier, RoundId, RoundStatus},
        RoundStateEvent,
    },
    AviatorConfig, GameError, ServiceBuilder, ServiceContainer,
};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::timeout;

const COUNTDOWN_END: u64 = 5_000;

struct FixedCrash(Multiplier);

impl CrashPointSource for FixedCrash {
    fn generate(&self, round_id: RoundId) -> (RoundSeed, Multiplier) {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&round_id.to_be_bytes());
        (RoundSeed::from_bytes(bytes), self.0)
    }
}

fn m(hundredths: u64) -> Multiplier {
    Multiplier::from_hundredths(hundredths)
}

fn cents(value: u64) -> Amount {
    Amount::from_cents(value)
}

/// Instant (engine time) at which the quote first reaches `target`
fn reached_at(target: Multiplier) -> u64 {
    COUNTDOWN_END + GrowthCurve::default().elapsed_to_reach(target)
}

async fn services(crash: u64) -> (ServiceContainer, Arc<ManualClock>) {
    services_with(crash, Arc::new(InMemoryAccounts::new(cents(100_000)))).await
}

async fn services_with(crash: u64, accounts: Arc<dyn AccountService>) -> (ServiceContainer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let services = ServiceBuilder::new()
        .with_clock(clock.clone())
        .with_crash_source(Arc::new(FixedCrash(m(crash))))
        .with_accounts(accounts)
        .build()
        .await
        .unwrap();
    (services, clock)
}

/// Account store whose debits and credits take a fixed time
struct SlowAccounts {
    inner: InMemoryAccounts,
    debit_delay: Duration,
    credit_delay: Duration,
    credits: AtomicU32,
}

impl SlowAccounts {
    fn new(debit_delay: Duration, credit_delay: Duration) -> Self {
        Self {
            inner: InMemoryAccounts::new(cents(100_000)),
            debit_delay,
            credit_delay,
            credits: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AccountService for SlowAccounts {
    async fn debit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
        tokio::time::sleep(self.debit_delay).await;
        self.inner.debit(user_id, amount).await
    }

    async fn credit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
        tokio::time::sleep(self.credit_delay).await;
        let balance = self.inner.credit(user_id, amount).await;
        self.credits.fetch_add(1, Ordering::SeqCst);
        balance
    }

    async fn balance(&self, user_id: &str) -> Result<Amount, AccountError> {
        self.inner.balance(user_id).await
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn test_manual_cash_out_at_1_80_pays_18_dollars() {
    let (services, clock) = services(200).await;
    let scheduler = services.scheduler();
    let accounts = services.accounts();

    let bet = scheduler.place_bet("alice", cents(1_000), None, None).await.unwrap();
    assert_eq!(accounts.balance("alice").await.unwrap(), cents(99_000));

    clock.set(reached_at(m(180)));
    let record = scheduler.cash_out("alice", bet.id, Some(m(181))).await.unwrap();

    assert_eq!(record.multiplier, Some(m(180)));
    assert_eq!(record.payout, cents(1_800));
    assert_eq!(record.trigger, Some(CashOutTrigger::Manual));
    scheduler.settlement().wait_for_credits().await;
    assert_eq!(accounts.balance("alice").await.unwrap(), cents(100_800));

    let err = scheduler.cash_out("alice", bet.id, None).await.unwrap_err();
    assert_eq!(err, GameError::AlreadyResolved { bet_id: bet.id });
}

#[tokio::test]
async fn test_cash_out_after_crash_is_rejected_and_bet_lost() {
    let (services, clock) = services(200).await;
    let scheduler = services.scheduler();

    let bet = scheduler.place_bet("bob", cents(1_000), None, None).await.unwrap();

    clock.set(reached_at(m(200)));
    let err = scheduler.cash_out("bob", bet.id, Some(m(199))).await.unwrap_err();
    assert_eq!(err, GameError::RoundClosed { round_id: 1 });

    let snapshot = scheduler.snapshot().await;
    assert_eq!(snapshot.status, RoundStatus::Crashed);
    assert_eq!(snapshot.crash_point, Some(m(200)));
    assert!(snapshot.seed.is_some());
    assert_eq!(snapshot.bets[0].outcome, BetOutcome::Lost);
    assert_eq!(snapshot.bets[0].payout, Amount::ZERO);
    assert_eq!(services.accounts().balance("bob").await.unwrap(), cents(99_000));
}

#[tokio::test]
async fn test_last_millisecond_before_crash_still_cashes_out() {
    let (services, clock) = services(200).await;
    let scheduler = services.scheduler();

    let bet = scheduler.place_bet("carol", cents(1_000), None, None).await.unwrap();

    clock.set(reached_at(m(200)) - 1);
    let record = scheduler.cash_out("carol", bet.id, None).await.unwrap();
    assert!(record.multiplier.unwrap() < m(200));
    assert_eq!(record.payout, record.multiplier.unwrap().payout(cents(1_000)).unwrap());
}

#[tokio::test]
async fn test_bet_on_running_round_is_rejected() {
    let (services, clock) = services(200).await;
    let scheduler = services.scheduler();

    clock.set(COUNTDOWN_END + 10);
    let err = scheduler.place_bet("dave", cents(1_000), None, None).await.unwrap_err();
    assert_eq!(err, GameError::RoundNotAcceptingBets { round_id: 1 });
    assert_eq!(services.accounts().balance("dave").await.unwrap(), cents(100_000));
}

#[tokio::test]
async fn test_auto_cash_outs_settle_in_target_order() {
    let (services, clock) = services(200).await;
    let scheduler = services.scheduler();
    let mut events = scheduler.subscribe();

    let a = scheduler.place_bet("a", cents(1_000), Some(m(150)), None).await.unwrap();
    let b = scheduler.place_bet("b", cents(1_000), Some(m(120)), None).await.unwrap();
    let c = scheduler.place_bet("c", cents(1_000), Some(m(130)), None).await.unwrap();
    let d = scheduler.place_bet("d", cents(1_000), Some(m(250)), None).await.unwrap();

    // One jump past the crash: the sweep must still honor each target
    clock.set(reached_at(m(200)) + 5);
    let snapshot = scheduler.snapshot().await;
    assert_eq!(snapshot.status, RoundStatus::Crashed);

    let mut cashed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RoundStateEvent::BetCashedOut { bet_id, multiplier, trigger, .. } = event {
            assert_eq!(trigger, CashOutTrigger::Auto);
            cashed.push((bet_id, multiplier));
        }
    }
    assert_eq!(cashed, vec![(b.id, m(120)), (c.id, m(130)), (a.id, m(150))]);

    let lost = snapshot.bets.iter().find(|bet| bet.id == d.id).unwrap();
    assert_eq!(lost.outcome, BetOutcome::Lost);

    scheduler.settlement().wait_for_credits().await;
    let accounts = services.accounts();
    assert_eq!(accounts.balance("b").await.unwrap(), cents(99_000 + 1_200));
    assert_eq!(accounts.balance("c").await.unwrap(), cents(99_000 + 1_300));
    assert_eq!(accounts.balance("a").await.unwrap(), cents(99_000 + 1_500));
    assert_eq!(accounts.balance("d").await.unwrap(), cents(99_000));
}

#[tokio::test]
async fn test_event_order_and_rotation() {
    let (services, clock) = services(150).await;
    let scheduler = services.scheduler();
    let mut events = scheduler.subscribe();

    let first = scheduler.snapshot().await;
    clock.set(COUNTDOWN_END + 1);
    scheduler.tick().await;
    let crash_at = reached_at(m(150));
    clock.set(crash_at);
    scheduler.tick().await;
    clock.set(crash_at + 3_000);
    let next = scheduler.snapshot().await;

    assert_eq!(next.round_id, 2);
    assert_eq!(next.status, RoundStatus::Waiting);
    assert_eq!(next.countdown_ends_at, crash_at + 3_000 + 5_000);
    assert_ne!(next.seed_hash, first.seed_hash);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        let kind = match event {
            RoundStateEvent::WaitingStarted { round_id, .. } => format!("waiting:{}", round_id),
            RoundStateEvent::RoundStarted { round_id, .. } => format!("started:{}", round_id),
            RoundStateEvent::MultiplierTick { .. } => continue,
            RoundStateEvent::RoundCrashed { round_id, .. } => format!("crashed:{}", round_id),
            other => format!("{:?}", other),
        };
        kinds.push(kind);
    }
    assert_eq!(kinds, vec!["started:1", "crashed:1", "waiting:2"]);
}

#[tokio::test]
async fn test_finished_round_reaches_history() {
    let (services, clock) = services(200).await;
    let scheduler = services.scheduler();

    scheduler.place_bet("erin", cents(500), Some(m(110)), None).await.unwrap();
    clock.set(reached_at(m(200)) + 1);
    scheduler.tick().await;

    let history = services.history();
    let mut record = None;
    for _ in 0..100 {
        record = history.load_round(1).await.unwrap();
        if record.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.expect("round 1 archived");

    assert_eq!(record.crash_point, m(200));
    assert_eq!(record.bets.len(), 1);
    assert_eq!(record.total_staked, cents(500));
    assert_eq!(record.total_paid_out, cents(550));
    assert_eq!(record.seed_hash, RoundSeed::from_hex(&record.seed).unwrap().commitment());

    let recent = history.recent_rounds(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].round_id, 1);
}

#[tokio::test]
async fn test_generated_round_is_verifiable() {
    let mut config = AviatorConfig::default();
    config.fairness.server_secret = Some(hex::encode(b"integration-secret"));
    let generator = CrashGenerator::from_config(&config.fairness).unwrap();
    let (_, crash_point) = generator.generate(1);

    let clock = Arc::new(ManualClock::new(0));
    let services = ServiceBuilder::new()
        .with_config(config.clone())
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();
    let scheduler = services.scheduler();

    let waiting = scheduler.snapshot().await;
    clock.set(reached_at(crash_point));
    let crashed = scheduler.snapshot().await;

    assert_eq!(crashed.status, RoundStatus::Crashed);
    assert_eq!(crashed.crash_point, Some(crash_point));
    let seed = crashed.seed.unwrap();
    let verified = verify_round(
        &seed,
        Some(&waiting.seed_hash),
        config.fairness.house_edge_bps,
        config.fairness.max_multiplier(),
    )
    .unwrap();
    assert_eq!(verified, crash_point);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cash_outs_settle_once() {
    let (services, clock) = services(300).await;
    let scheduler = services.scheduler();

    let bet = scheduler.place_bet("frank", cents(1_000), None, None).await.unwrap();
    clock.set(reached_at(m(200)));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move { scheduler.cash_out("frank", bet.id, None).await }));
    }

    let mut successes = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => successes.push(record),
            Err(e) => assert_eq!(e, GameError::AlreadyResolved { bet_id: bet.id }),
        }
    }

    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].payout, cents(2_000));
    scheduler.settlement().wait_for_credits().await;
    assert_eq!(services.accounts().balance("frank").await.unwrap(), cents(99_000 + 2_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bets_from_one_user_debit_once() {
    let (services, _clock) = services(200).await;
    let scheduler = services.scheduler();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler.place_bet("grace", cents(1_000), None, None).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert_eq!(e, GameError::DuplicateBet { round_id: 1 }),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(services.accounts().balance("grace").await.unwrap(), cents(99_000));
}

#[tokio::test]
async fn test_cash_out_returns_before_credit_and_payout_still_lands() {
    let accounts = Arc::new(SlowAccounts::new(Duration::ZERO, Duration::from_millis(300)));
    let (services, clock) = services_with(200, accounts.clone()).await;
    let scheduler = services.scheduler();

    let bet = scheduler.place_bet("alice", cents(1_000), None, None).await.unwrap();
    clock.set(reached_at(m(180)));

    // A caller that gives up early still gets its cash-out settled and paid
    let record = timeout(Duration::from_millis(100), scheduler.cash_out("alice", bet.id, None))
        .await
        .expect("cash-out must not wait for the account service")
        .unwrap();
    assert_eq!(record.payout, cents(1_800));
    assert_eq!(accounts.balance("alice").await.unwrap(), cents(99_000));

    scheduler.settlement().wait_for_credits().await;
    assert_eq!(accounts.balance("alice").await.unwrap(), cents(100_800));
    assert_eq!(accounts.credits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tick_does_not_wait_for_auto_cash_out_credits() {
    let accounts = Arc::new(SlowAccounts::new(Duration::ZERO, Duration::from_millis(300)));
    let (services, clock) = services_with(300, accounts.clone()).await;
    let scheduler = services.scheduler();

    let users: Vec<String> = (0..10).map(|i| format!("user-{}", i)).collect();
    for user in &users {
        scheduler.place_bet(user, cents(1_000), Some(m(150)), None).await.unwrap();
    }

    clock.set(reached_at(m(160)));
    timeout(Duration::from_millis(100), scheduler.tick())
        .await
        .expect("tick must not wait for credits");

    let snapshot = scheduler.snapshot().await;
    assert!(snapshot.bets.iter().all(|bet| bet.outcome == BetOutcome::CashedOut));

    scheduler.settlement().wait_for_credits().await;
    for user in &users {
        assert_eq!(accounts.balance(user).await.unwrap(), cents(99_000 + 1_500));
    }
}

#[tokio::test]
async fn test_abandoned_bet_request_still_completes_placement() {
    let accounts = Arc::new(SlowAccounts::new(Duration::from_millis(200), Duration::ZERO));
    let (services, _clock) = services_with(200, accounts.clone()).await;
    let scheduler = services.scheduler();

    let abandoned = timeout(
        Duration::from_millis(20),
        scheduler.place_bet("henry", cents(1_000), None, None),
    )
    .await;
    assert!(abandoned.is_err());

    // The debit lands and the bet is committed without the caller
    let mut placed = false;
    for _ in 0..200 {
        if scheduler.snapshot().await.bets.iter().any(|bet| bet.user_id == "henry") {
            placed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(placed, "placement never committed");
    assert_eq!(accounts.balance("henry").await.unwrap(), cents(99_000));

    let retry = scheduler.place_bet("henry", cents(1_000), None, None).await;
    assert_eq!(retry, Err(GameError::DuplicateBet { round_id: 1 }));
    assert_eq!(accounts.balance("henry").await.unwrap(), cents(99_000));
}

#[tokio::test]
async fn test_abandoned_bet_request_refunds_when_round_starts_mid_debit() {
    let accounts = Arc::new(SlowAccounts::new(Duration::from_millis(200), Duration::ZERO));
    let (services, clock) = services_with(200, accounts.clone()).await;
    let scheduler = services.scheduler();

    let abandoned = timeout(
        Duration::from_millis(20),
        scheduler.place_bet("ivan", cents(1_000), None, None),
    )
    .await;
    assert!(abandoned.is_err());
    clock.set(COUNTDOWN_END + 1);

    let credits = accounts.clone();
    eventually(move || credits.credits.load(Ordering::SeqCst) == 1).await;

    assert_eq!(accounts.balance("ivan").await.unwrap(), cents(100_000));
    let snapshot = scheduler.snapshot().await;
    assert_eq!(snapshot.status, RoundStatus::Running);
    assert!(snapshot.bets.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tick_and_manual_cash_out_race_settles_once() {
    for _ in 0..20 {
        let (services, clock) = services(300).await;
        let scheduler = services.scheduler();
        let mut events = scheduler.subscribe();

        let bet = scheduler.place_bet("judy", cents(1_000), Some(m(150)), None).await.unwrap();
        clock.set(reached_at(m(150)) + 1);

        let ticker = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.tick().await })
        };
        let manual = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.cash_out("judy", bet.id, None).await })
        };
        ticker.await.unwrap();

        // The auto target was passed first, so it wins whichever task locks first
        assert_eq!(manual.await.unwrap(), Err(GameError::AlreadyResolved { bet_id: bet.id }));

        let mut cashed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RoundStateEvent::BetCashedOut { bet_id, multiplier, trigger, .. } = event {
                cashed.push((bet_id, multiplier, trigger));
            }
        }
        assert_eq!(cashed, vec![(bet.id, m(150), CashOutTrigger::Auto)]);

        scheduler.settlement().wait_for_credits().await;
        assert_eq!(services.accounts().balance("judy").await.unwrap(), cents(99_000 + 1_500));
    }
}
