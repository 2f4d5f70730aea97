//! Bet ledger for one round
//!
//! Every method takes the round's state machine by reference and is called
//! under the round lock, so bet resolution and round transitions never
//! interleave. Resolution itself goes through [`SettlementEngine::finalize`],
//! which makes the first resolver win and every later attempt a no-op.

use crate::{
    errors::GameError,
    games::{
        round::RoundStateMachine,
        settlement::{Finalization, Resolution, SettlementEngine, SettlementRecord},
        types::{Amount, Bet, BetId, CashOutTrigger, Millis, Multiplier, RoundId, UserId},
    },
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Stake and auto cash-out limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetLimits {
    pub min_stake: Amount,
    pub max_stake: Amount,
    pub min_auto_cash_out: Multiplier,
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            min_stake: Amount::from_cents(100),
            max_stake: Amount::from_cents(100_000),
            min_auto_cash_out: Multiplier::from_hundredths(101),
        }
    }
}

impl BetLimits {
    pub fn validate(&self, stake: Amount, auto_cash_out: Option<Multiplier>) -> Result<(), GameError> {
        if stake.is_zero() {
            return Err(GameError::InvalidStake);
        }
        if stake < self.min_stake || stake > self.max_stake {
            return Err(GameError::StakeOutOfRange {
                stake,
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        if let Some(target) = auto_cash_out {
            if target < self.min_auto_cash_out {
                return Err(GameError::InvalidAutoCashOut {
                    min: self.min_auto_cash_out.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct BetLedger {
    round_id: RoundId,
    bets: BTreeMap<BetId, Bet>,
    by_user: HashMap<UserId, BetId>,
    /// Users whose placement is between reserve and commit
    reserved: HashSet<UserId>,
}

impl BetLedger {
    pub fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            bets: BTreeMap::new(),
            by_user: HashMap::new(),
            reserved: HashSet::new(),
        }
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Claim the user's single slot in this round while the stake is debited
    pub fn reserve(&mut self, round: &RoundStateMachine, user_id: &str) -> Result<(), GameError> {
        debug_assert_eq!(round.round_id(), self.round_id);
        round.ensure_accepting_bets()?;

        if self.by_user.contains_key(user_id) || self.reserved.contains(user_id) {
            return Err(GameError::DuplicateBet { round_id: self.round_id });
        }
        self.reserved.insert(user_id.to_string());
        Ok(())
    }

    pub fn release(&mut self, user_id: &str) {
        self.reserved.remove(user_id);
    }

    /// Turn a reservation into a Pending bet. The reservation is consumed
    /// either way; on error the caller refunds the stake.
    pub fn commit(
        &mut self,
        round: &RoundStateMachine,
        bet_id: BetId,
        user_id: &str,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        now: Millis,
    ) -> Result<Bet, GameError> {
        let was_reserved = self.reserved.remove(user_id);
        debug_assert!(was_reserved, "commit without reservation");
        round.ensure_accepting_bets()?;

        let bet = Bet::new(bet_id, self.round_id, user_id.to_string(), stake, auto_cash_out, now);
        self.by_user.insert(bet.user_id.clone(), bet_id);
        self.bets.insert(bet_id, bet.clone());

        info!(round_id = self.round_id, bet_id, user_id = %user_id, stake = %stake, auto_cash_out = ?auto_cash_out, "Bet placed");
        Ok(bet)
    }

    /// Single-step placement for callers that take the stake themselves
    #[allow(clippy::too_many_arguments)]
    pub fn place_bet(
        &mut self,
        round: &RoundStateMachine,
        limits: &BetLimits,
        bet_id: BetId,
        user_id: &str,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        now: Millis,
    ) -> Result<Bet, GameError> {
        limits.validate(stake, auto_cash_out)?;
        self.reserve(round, user_id)?;
        self.commit(round, bet_id, user_id, stake, auto_cash_out, now)
    }

    /// Manual cash-out at the server-computed multiplier.
    ///
    /// `observed` is what the client saw; it is logged and never used.
    pub fn request_cash_out(
        &mut self,
        round: &RoundStateMachine,
        settlement: &SettlementEngine,
        user_id: &str,
        bet_id: BetId,
        observed: Option<Multiplier>,
        now: Millis,
    ) -> Result<SettlementRecord, GameError> {
        let bet = self
            .bets
            .get_mut(&bet_id)
            .filter(|bet| bet.user_id == user_id)
            .ok_or(GameError::BetNotFound { bet_id })?;

        let multiplier = round.cash_out_multiplier(now)?;
        if let Some(observed) = observed.filter(|observed| *observed != multiplier) {
            debug!(bet_id, observed = %observed, authoritative = %multiplier, "Client multiplier differs from server");
        }

        let resolution = Resolution::CashOut {
            multiplier,
            trigger: CashOutTrigger::Manual,
        };
        match settlement.finalize(bet, resolution, now) {
            Finalization::Settled(record) => {
                info!(round_id = self.round_id, bet_id, multiplier = %multiplier, payout = %record.payout, "Manual cash-out");
                Ok(record)
            }
            Finalization::AlreadyResolved => Err(GameError::AlreadyResolved { bet_id }),
        }
    }

    /// Cash out every Pending bet whose auto target is at or below `current`,
    /// ascending by (target, bet id). Each settles at its own target.
    pub fn resolve_auto_cashouts(
        &mut self,
        round: &RoundStateMachine,
        settlement: &SettlementEngine,
        current: Multiplier,
    ) -> Vec<SettlementRecord> {
        let mut due: Vec<(Multiplier, BetId)> = self
            .bets
            .values()
            .filter(|bet| bet.is_pending())
            .filter_map(|bet| bet.auto_cash_out.map(|target| (target, bet.id)))
            .filter(|(target, _)| *target <= current)
            .collect();
        due.sort_unstable();

        let mut settled = Vec::with_capacity(due.len());
        for (target, bet_id) in due {
            let Some(bet) = self.bets.get_mut(&bet_id) else {
                continue;
            };
            let resolution = Resolution::CashOut {
                multiplier: target,
                trigger: CashOutTrigger::Auto,
            };
            if let Finalization::Settled(record) = settlement.finalize(bet, resolution, round.reached_at(target)) {
                debug!(round_id = self.round_id, bet_id, target = %target, payout = %record.payout, "Auto cash-out");
                settled.push(record);
            }
        }
        settled
    }

    /// Resolve every remaining Pending bet as Lost. No-op before the crash.
    pub fn settle_losses(
        &mut self,
        round: &RoundStateMachine,
        settlement: &SettlementEngine,
    ) -> Vec<SettlementRecord> {
        let Some(crashed_at) = round.crashed_at() else {
            return Vec::new();
        };

        let mut settled = Vec::new();
        for bet in self.bets.values_mut().filter(|bet| bet.is_pending()) {
            if let Finalization::Settled(record) = settlement.finalize(bet, Resolution::Lost, crashed_at) {
                settled.push(record);
            }
        }
        if !settled.is_empty() {
            info!(round_id = self.round_id, lost = settled.len(), "Crash sweep settled remaining bets");
        }
        settled
    }

    pub fn get(&self, bet_id: BetId) -> Option<&Bet> {
        self.bets.get(&bet_id)
    }

    pub fn bet_for_user(&self, user_id: &str) -> Option<&Bet> {
        self.by_user.get(user_id).and_then(|bet_id| self.bets.get(bet_id))
    }

    /// Ids of all Pending bets, ascending
    pub fn pending_ids(&self) -> Vec<BetId> {
        self.bets
            .values()
            .filter(|bet| bet.is_pending())
            .map(|bet| bet.id)
            .collect()
    }

    /// All bets in placement order
    pub fn bets(&self) -> Vec<Bet> {
        self.bets.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }
}
