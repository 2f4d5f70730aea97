//! Settlement: exactly-once bet resolution and balance deltas.
//!
//! `finalize` is synchronous and runs under the round lock; it only flips the
//! bet's outcome and computes the payout. Stake debits are awaited by the
//! placement task without the lock. Credits (payouts and refunds) are queued
//! under the lock and delivered by a spawned worker that owns the retries,
//! so no request or tick ever waits on a credit.

use crate::{
    errors::GameError,
    games::types::{Amount, Bet, BetId, BetOutcome, CashOutTrigger, Millis, Multiplier, RoundId, UserId},
    metrics::GameMetrics,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, warn};

/// Account collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Account service unavailable: {0}")]
    Unavailable(String),
}

impl From<AccountError> for GameError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientBalance { requested, available } => {
                GameError::InsufficientBalance { requested, available }
            }
            AccountError::Unavailable(reason) => GameError::AccountUnavailable(reason),
        }
    }
}

/// External balance owner. The engine only requests deltas.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Remove `amount` from the user's balance, returning the new balance
    async fn debit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError>;

    /// Add `amount` to the user's balance, returning the new balance
    async fn credit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError>;

    async fn balance(&self, user_id: &str) -> Result<Amount, AccountError>;
}

/// In-process account store; new users start with a demo balance
pub struct InMemoryAccounts {
    balances: DashMap<UserId, Amount>,
    initial_balance: Amount,
}

impl InMemoryAccounts {
    pub fn new(initial_balance: Amount) -> Self {
        Self {
            balances: DashMap::new(),
            initial_balance,
        }
    }

    pub fn deposit(&self, user_id: &str, amount: Amount) -> Amount {
        let mut entry = self
            .balances
            .entry(user_id.to_string())
            .or_insert(self.initial_balance);
        *entry = entry.saturating_add(amount);
        *entry
    }
}

#[async_trait]
impl AccountService for InMemoryAccounts {
    async fn debit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
        let mut entry = self
            .balances
            .entry(user_id.to_string())
            .or_insert(self.initial_balance);
        let available = *entry;
        let remaining = available
            .checked_sub(amount)
            .ok_or(AccountError::InsufficientBalance { requested: amount, available })?;
        *entry = remaining;
        Ok(remaining)
    }

    async fn credit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
        Ok(self.deposit(user_id, amount))
    }

    async fn balance(&self, user_id: &str) -> Result<Amount, AccountError> {
        Ok(self
            .balances
            .get(user_id)
            .map(|entry| *entry)
            .unwrap_or(self.initial_balance))
    }
}

/// How a pending bet is being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    CashOut { multiplier: Multiplier, trigger: CashOutTrigger },
    Lost,
}

/// Outcome of one successful finalization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementRecord {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub stake: Amount,
    pub outcome: BetOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<Multiplier>,
    pub payout: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<CashOutTrigger>,
    pub resolved_at: Millis,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    Settled(SettlementRecord),
    /// The bet was already resolved; nothing changed
    AlreadyResolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CreditReason {
    Payout { bet_id: BetId },
    Refund,
}

#[derive(Debug, Clone)]
struct CreditRequest {
    user_id: UserId,
    amount: Amount,
    reason: CreditReason,
    attempts: u32,
}

/// Retry policy for failed credits
#[derive(Debug, Clone, Copy)]
pub struct CreditRetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for CreditRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

pub struct SettlementEngine {
    accounts: Arc<dyn AccountService>,
    account_timeout: Duration,
    retry_policy: CreditRetryPolicy,
    credit_tx: mpsc::UnboundedSender<CreditRequest>,
    credit_rx: Mutex<Option<mpsc::UnboundedReceiver<CreditRequest>>>,
    /// Credits queued but not yet delivered or abandoned
    pending: Arc<watch::Sender<usize>>,
    metrics: Arc<GameMetrics>,
}

impl SettlementEngine {
    pub fn new(
        accounts: Arc<dyn AccountService>,
        account_timeout: Duration,
        retry_policy: CreditRetryPolicy,
        metrics: Arc<GameMetrics>,
    ) -> Self {
        let (credit_tx, credit_rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        Self {
            accounts,
            account_timeout,
            retry_policy,
            credit_tx,
            credit_rx: Mutex::new(Some(credit_rx)),
            pending: Arc::new(pending),
            metrics,
        }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountService> {
        &self.accounts
    }

    /// Exactly-once transition `Pending -> {CashedOut, Lost}`.
    ///
    /// Calling this on a resolved bet is a no-op returning
    /// [`Finalization::AlreadyResolved`].
    pub fn finalize(&self, bet: &mut Bet, resolution: Resolution, now: Millis) -> Finalization {
        if !bet.is_pending() {
            debug!(bet_id = bet.id, outcome = ?bet.outcome, "Finalize on resolved bet ignored");
            return Finalization::AlreadyResolved;
        }

        match resolution {
            Resolution::CashOut { multiplier, trigger } => {
                // Stake limits keep this far from overflow
                let payout = multiplier
                    .payout(bet.stake)
                    .unwrap_or(Amount::from_cents(u64::MAX));
                bet.outcome = BetOutcome::CashedOut;
                bet.realized_multiplier = Some(multiplier);
                bet.payout = payout;
                bet.trigger = Some(trigger);
                self.metrics.record_cash_out(payout, trigger);
            }
            Resolution::Lost => {
                bet.outcome = BetOutcome::Lost;
                bet.payout = Amount::ZERO;
                self.metrics.record_loss();
            }
        }
        bet.resolved_at = Some(now);

        Finalization::Settled(SettlementRecord {
            bet_id: bet.id,
            round_id: bet.round_id,
            user_id: bet.user_id.clone(),
            stake: bet.stake,
            outcome: bet.outcome,
            multiplier: bet.realized_multiplier,
            payout: bet.payout,
            trigger: bet.trigger,
            resolved_at: now,
        })
    }

    /// Take the stake at placement, failing fast after the account timeout
    pub async fn debit_stake(&self, user_id: &str, stake: Amount) -> Result<(), GameError> {
        match timeout(self.account_timeout, self.accounts.debit(user_id, stake)).await {
            Ok(Ok(balance)) => {
                debug!(user_id = %user_id, stake = %stake, balance = %balance, "Stake debited");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(GameError::AccountUnavailable(format!(
                "debit timed out after {}ms",
                self.account_timeout.as_millis()
            ))),
        }
    }

    /// Queue the credit for a winning record. Never waits on the account
    /// service, so it is safe to call with the round lock held.
    pub fn queue_payout(&self, record: &SettlementRecord) {
        if record.outcome != BetOutcome::CashedOut || record.payout.is_zero() {
            return;
        }
        self.enqueue(CreditRequest {
            user_id: record.user_id.clone(),
            amount: record.payout,
            reason: CreditReason::Payout { bet_id: record.bet_id },
            attempts: 0,
        });
    }

    /// Queue the return of a stake whose placement was rejected after the debit
    pub fn queue_refund(&self, user_id: &str, amount: Amount) {
        self.enqueue(CreditRequest {
            user_id: user_id.to_string(),
            amount,
            reason: CreditReason::Refund,
            attempts: 0,
        });
    }

    fn enqueue(&self, request: CreditRequest) {
        self.pending.send_modify(|pending| *pending += 1);
        if let Err(mpsc::error::SendError(request)) = self.credit_tx.send(request) {
            error!(user_id = %request.user_id, amount = %request.amount, reason = ?request.reason, "Credit queue closed, credit dropped");
            self.metrics.record_credit_failure();
            self.pending.send_modify(|pending| *pending = pending.saturating_sub(1));
        }
    }

    pub fn pending_credits(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolves once every queued credit was delivered or abandoned
    pub async fn wait_for_credits(&self) {
        let mut pending = self.pending.subscribe();
        // The sender lives as long as `self`, so this only ends at zero
        let _ = pending.wait_for(|count| *count == 0).await;
    }

    /// Start the credit worker. Only the first call spawns a task; requests
    /// queued before that are buffered.
    ///
    /// Each request is delivered on its own task so a failing account does
    /// not hold up credits for other users.
    pub fn spawn_credit_worker(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.credit_rx.lock().ok()?.take()?;
        let delivery = CreditDelivery {
            accounts: self.accounts.clone(),
            account_timeout: self.account_timeout,
            policy: self.retry_policy,
            metrics: self.metrics.clone(),
            pending: self.pending.clone(),
        };

        Some(tokio::spawn(async move {
            info!("Credit worker started");
            while let Some(request) = rx.recv().await {
                tokio::spawn(delivery.clone().deliver(request));
            }
            info!("Credit worker stopped");
        }))
    }
}

#[derive(Clone)]
struct CreditDelivery {
    accounts: Arc<dyn AccountService>,
    account_timeout: Duration,
    policy: CreditRetryPolicy,
    metrics: Arc<GameMetrics>,
    pending: Arc<watch::Sender<usize>>,
}

impl CreditDelivery {
    /// First attempt plus linear-backoff retries up to `max_attempts`
    async fn deliver(self, mut request: CreditRequest) {
        loop {
            match try_credit(self.accounts.as_ref(), self.account_timeout, &request).await {
                Ok(balance) if request.attempts == 0 => {
                    debug!(user_id = %request.user_id, amount = %request.amount, balance = %balance, reason = ?request.reason, "Credited");
                    break;
                }
                Ok(balance) => {
                    info!(user_id = %request.user_id, amount = %request.amount, attempts = request.attempts + 1, balance = %balance, "Credit retry succeeded");
                    break;
                }
                Err(e) => {
                    request.attempts += 1;
                    if request.attempts >= self.policy.max_attempts {
                        error!(user_id = %request.user_id, amount = %request.amount, reason = ?request.reason, "Credit abandoned after {} attempts: {}", request.attempts, e);
                        self.metrics.record_credit_failure();
                        break;
                    }
                    warn!(user_id = %request.user_id, amount = %request.amount, reason = ?request.reason, attempt = request.attempts, "Credit failed, retrying: {}", e);
                    self.metrics.record_credit_retry();
                    tokio::time::sleep(self.policy.backoff * request.attempts).await;
                }
            }
        }
        self.pending.send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

async fn try_credit(
    accounts: &dyn AccountService,
    account_timeout: Duration,
    request: &CreditRequest,
) -> Result<Amount, AccountError> {
    match timeout(account_timeout, accounts.credit(&request.user_id, request.amount)).await {
        Ok(result) => result,
        Err(_) => Err(AccountError::Unavailable(format!(
            "credit timed out after {}ms",
            account_timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine(accounts: Arc<dyn AccountService>) -> SettlementEngine {
        SettlementEngine::new(
            accounts,
            Duration::from_millis(50),
            CreditRetryPolicy {
                max_attempts: 5,
                backoff: Duration::from_millis(5),
            },
            Arc::new(GameMetrics::new()),
        )
    }

    fn bet(stake_cents: u64) -> Bet {
        Bet::new(1, 1, "alice".to_string(), Amount::from_cents(stake_cents), None, 0)
    }

    /// Fails the first `failures` credits
    struct FlakyAccounts {
        inner: InMemoryAccounts,
        failures: AtomicU32,
    }

    #[async_trait]
    impl AccountService for FlakyAccounts {
        async fn debit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
            self.inner.debit(user_id, amount).await
        }

        async fn credit(&self, user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AccountError::Unavailable("down".to_string()));
            }
            self.inner.credit(user_id, amount).await
        }

        async fn balance(&self, user_id: &str) -> Result<Amount, AccountError> {
            self.inner.balance(user_id).await
        }
    }

    struct SlowAccounts;

    #[async_trait]
    impl AccountService for SlowAccounts {
        async fn debit(&self, _user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(amount)
        }

        async fn credit(&self, _user_id: &str, amount: Amount) -> Result<Amount, AccountError> {
            Ok(amount)
        }

        async fn balance(&self, _user_id: &str) -> Result<Amount, AccountError> {
            Ok(Amount::ZERO)
        }
    }

    #[test]
    fn test_finalize_cash_out_computes_floored_payout() {
        let engine = engine(Arc::new(InMemoryAccounts::new(Amount::ZERO)));
        let mut bet = bet(1_000);

        let result = engine.finalize(
            &mut bet,
            Resolution::CashOut {
                multiplier: Multiplier::from_hundredths(180),
                trigger: CashOutTrigger::Manual,
            },
            5_000,
        );

        let Finalization::Settled(record) = result else {
            panic!("expected settlement");
        };
        assert_eq!(record.payout, Amount::from_cents(1_800));
        assert_eq!(bet.outcome, BetOutcome::CashedOut);
        assert_eq!(bet.realized_multiplier, Some(Multiplier::from_hundredths(180)));
        assert_eq!(bet.resolved_at, Some(5_000));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let engine = engine(Arc::new(InMemoryAccounts::new(Amount::ZERO)));
        let mut bet = bet(1_000);

        assert!(matches!(engine.finalize(&mut bet, Resolution::Lost, 1), Finalization::Settled(_)));
        let snapshot = bet.clone();

        let second = engine.finalize(
            &mut bet,
            Resolution::CashOut {
                multiplier: Multiplier::from_hundredths(500),
                trigger: CashOutTrigger::Auto,
            },
            2,
        );
        assert_eq!(second, Finalization::AlreadyResolved);
        assert_eq!(bet, snapshot);
        assert_eq!(bet.payout, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_debit_reports_insufficient_balance() {
        let accounts = Arc::new(InMemoryAccounts::new(Amount::from_cents(500)));
        let engine = engine(accounts.clone());

        let err = engine.debit_stake("bob", Amount::from_cents(1_000)).await.unwrap_err();
        assert_eq!(
            err,
            GameError::InsufficientBalance {
                requested: Amount::from_cents(1_000),
                available: Amount::from_cents(500),
            }
        );

        engine.debit_stake("bob", Amount::from_cents(200)).await.unwrap();
        assert_eq!(accounts.balance("bob").await.unwrap(), Amount::from_cents(300));
    }

    #[tokio::test]
    async fn test_debit_times_out() {
        let engine = engine(Arc::new(SlowAccounts));
        let err = engine.debit_stake("carol", Amount::from_cents(100)).await.unwrap_err();
        assert!(matches!(err, GameError::AccountUnavailable(_)));
    }

    fn winning_record(engine: &SettlementEngine, stake_cents: u64, hundredths: u64) -> SettlementRecord {
        let mut bet = bet(stake_cents);
        let Finalization::Settled(record) = engine.finalize(
            &mut bet,
            Resolution::CashOut {
                multiplier: Multiplier::from_hundredths(hundredths),
                trigger: CashOutTrigger::Manual,
            },
            1,
        ) else {
            panic!("expected settlement");
        };
        record
    }

    #[tokio::test]
    async fn test_failed_credit_is_retried_in_background() {
        let accounts = Arc::new(FlakyAccounts {
            inner: InMemoryAccounts::new(Amount::ZERO),
            failures: AtomicU32::new(2),
        });
        let engine = engine(accounts.clone());
        let worker = engine.spawn_credit_worker().unwrap();
        assert!(engine.spawn_credit_worker().is_none());

        engine.queue_payout(&winning_record(&engine, 1_000, 250));
        engine.wait_for_credits().await;

        assert_eq!(accounts.balance("alice").await.unwrap(), Amount::from_cents(2_500));
        assert_eq!(engine.pending_credits(), 0);
        worker.abort();
    }

    #[tokio::test]
    async fn test_credits_queued_before_worker_are_delivered() {
        let accounts = Arc::new(InMemoryAccounts::new(Amount::ZERO));
        let engine = engine(accounts.clone());

        engine.queue_payout(&winning_record(&engine, 1_000, 180));
        engine.queue_refund("bob", Amount::from_cents(300));
        assert_eq!(engine.pending_credits(), 2);
        assert_eq!(accounts.balance("alice").await.unwrap(), Amount::ZERO);

        let worker = engine.spawn_credit_worker().unwrap();
        engine.wait_for_credits().await;

        assert_eq!(accounts.balance("alice").await.unwrap(), Amount::from_cents(1_800));
        assert_eq!(accounts.balance("bob").await.unwrap(), Amount::from_cents(300));
        worker.abort();
    }

    #[tokio::test]
    async fn test_credit_abandoned_after_max_attempts() {
        let accounts = Arc::new(FlakyAccounts {
            inner: InMemoryAccounts::new(Amount::ZERO),
            failures: AtomicU32::new(10),
        });
        let engine = engine(accounts.clone());
        let worker = engine.spawn_credit_worker().unwrap();

        engine.queue_payout(&winning_record(&engine, 1_000, 200));
        engine.wait_for_credits().await;

        // Five attempts consumed five of the ten failures
        assert_eq!(accounts.failures.load(Ordering::SeqCst), 5);
        assert_eq!(accounts.balance("alice").await.unwrap(), Amount::ZERO);
        worker.abort();
    }

    #[tokio::test]
    async fn test_lost_bets_do_not_credit() {
        let accounts = Arc::new(InMemoryAccounts::new(Amount::ZERO));
        let engine = engine(accounts.clone());
        let mut bet = bet(1_000);

        let Finalization::Settled(record) = engine.finalize(&mut bet, Resolution::Lost, 1) else {
            panic!("expected settlement");
        };
        engine.queue_payout(&record);
        assert_eq!(engine.pending_credits(), 0);
        engine.wait_for_credits().await;
        assert_eq!(accounts.balance("alice").await.unwrap(), Amount::ZERO);
    }
}
