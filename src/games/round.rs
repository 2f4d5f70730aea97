//! Round lifecycle state machine
//!
//! `Waiting -> Running -> Crashed`. Transitions are pure functions of time:
//! the round starts exactly at `countdown_ends_at` and crashes exactly at the
//! first millisecond whose quoted multiplier reaches the crash point, no
//! matter when a tick or request happens to observe it.

use crate::{
    errors::GameError,
    games::{
        fairness::RoundSeed,
        growth::GrowthCurve,
        types::{Amount, Bet, BetOutcome, Millis, Multiplier, RoundId, RoundRecord, RoundStatus},
    },
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Waiting { countdown_ends_at: Millis },
    Running { started_at: Millis, crash_point: Multiplier },
    Crashed { crashed_at: Millis, crash_point: Multiplier },
}

/// A transition fired by [`RoundStateMachine::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started { round_id: RoundId, started_at: Millis },
    Crashed { round_id: RoundId, crashed_at: Millis, crash_point: Multiplier },
}

#[derive(Debug)]
pub struct RoundStateMachine {
    round_id: RoundId,
    seed: RoundSeed,
    seed_hash: String,
    crash_point: Multiplier,
    curve: GrowthCurve,
    countdown_ends_at: Millis,
    /// Elapsed running time at which the quoted multiplier reaches the crash point
    crash_offset_ms: u64,
    state: RoundState,
}

impl RoundStateMachine {
    pub fn new(
        round_id: RoundId,
        seed: RoundSeed,
        crash_point: Multiplier,
        curve: GrowthCurve,
        countdown_ends_at: Millis,
    ) -> Self {
        let crash_point = crash_point.max(Multiplier::ONE);
        Self {
            round_id,
            seed_hash: seed.commitment(),
            seed,
            crash_point,
            curve,
            countdown_ends_at,
            crash_offset_ms: curve.elapsed_to_reach(crash_point),
            state: RoundState::Waiting { countdown_ends_at },
        }
    }

    /// Fire every transition due at `now`, in order
    pub fn advance(&mut self, now: Millis) -> Vec<Transition> {
        let mut fired = Vec::new();
        loop {
            match self.state {
                RoundState::Waiting { countdown_ends_at } if now >= countdown_ends_at => {
                    self.state = RoundState::Running {
                        started_at: countdown_ends_at,
                        crash_point: self.crash_point,
                    };
                    fired.push(Transition::Started {
                        round_id: self.round_id,
                        started_at: countdown_ends_at,
                    });
                }
                RoundState::Running { started_at, crash_point } => {
                    let crashed_at = started_at.saturating_add(self.crash_offset_ms);
                    if now < crashed_at {
                        break;
                    }
                    self.state = RoundState::Crashed { crashed_at, crash_point };
                    fired.push(Transition::Crashed {
                        round_id: self.round_id,
                        crashed_at,
                        crash_point,
                    });
                }
                _ => break,
            }
        }

        if !fired.is_empty() {
            debug!(round_id = self.round_id, transitions = fired.len(), status = %self.status(), "Round advanced");
        }
        fired
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn status(&self) -> RoundStatus {
        match self.state {
            RoundState::Waiting { .. } => RoundStatus::Waiting,
            RoundState::Running { .. } => RoundStatus::Running,
            RoundState::Crashed { .. } => RoundStatus::Crashed,
        }
    }

    pub fn is_crashed(&self) -> bool {
        matches!(self.state, RoundState::Crashed { .. })
    }

    pub fn seed_hash(&self) -> &str {
        &self.seed_hash
    }

    pub fn countdown_ends_at(&self) -> Millis {
        self.countdown_ends_at
    }

    /// Equal to `countdown_ends_at` once the round has left Waiting
    pub fn started_at(&self) -> Option<Millis> {
        match self.state {
            RoundState::Waiting { .. } => None,
            _ => Some(self.countdown_ends_at),
        }
    }

    pub fn crashed_at(&self) -> Option<Millis> {
        match self.state {
            RoundState::Crashed { crashed_at, .. } => Some(crashed_at),
            _ => None,
        }
    }

    /// Crash point, revealed only once Crashed
    pub fn revealed_crash_point(&self) -> Option<Multiplier> {
        match self.state {
            RoundState::Crashed { crash_point, .. } => Some(crash_point),
            _ => None,
        }
    }

    /// Raw seed hex, revealed only once Crashed
    pub fn revealed_seed(&self) -> Option<String> {
        self.is_crashed().then(|| self.seed.to_hex())
    }

    pub fn elapsed_ms(&self, now: Millis) -> u64 {
        match self.state {
            RoundState::Waiting { .. } => 0,
            RoundState::Running { started_at, .. } => now.saturating_sub(started_at),
            RoundState::Crashed { .. } => self.crash_offset_ms,
        }
    }

    /// Multiplier displayed at `now`; the crash point once Crashed
    pub fn current_multiplier(&self, now: Millis) -> Multiplier {
        match self.state {
            RoundState::Waiting { .. } => Multiplier::ONE,
            RoundState::Running { .. } => self.curve.multiplier_at(self.elapsed_ms(now)),
            RoundState::Crashed { crash_point, .. } => crash_point,
        }
    }

    /// Highest multiplier a bet could have been settled at so far.
    /// `None` while Waiting and for rounds that crashed instantly.
    pub fn highest_settleable(&self, now: Millis) -> Option<Multiplier> {
        match self.state {
            RoundState::Waiting { .. } => None,
            RoundState::Running { .. } => Some(self.current_multiplier(now)),
            RoundState::Crashed { .. } if self.crash_offset_ms == 0 => None,
            RoundState::Crashed { .. } => Some(self.curve.multiplier_at(self.crash_offset_ms - 1)),
        }
    }

    /// Instant at which the quoted multiplier first reached `target`
    pub fn reached_at(&self, target: Multiplier) -> Millis {
        self.countdown_ends_at.saturating_add(self.curve.elapsed_to_reach(target))
    }

    /// Fails unless the round is Waiting
    pub fn ensure_accepting_bets(&self) -> Result<(), GameError> {
        match self.state {
            RoundState::Waiting { .. } => Ok(()),
            RoundState::Running { .. } => Err(GameError::RoundNotAcceptingBets {
                round_id: self.round_id,
            }),
            RoundState::Crashed { .. } => Err(GameError::RoundClosed { round_id: self.round_id }),
        }
    }

    /// Server-authoritative cash-out multiplier at `now`. Call after `advance(now)`.
    pub fn cash_out_multiplier(&self, now: Millis) -> Result<Multiplier, GameError> {
        match self.state {
            RoundState::Waiting { .. } => Err(GameError::RoundNotStarted { round_id: self.round_id }),
            RoundState::Running { crash_point, .. } => {
                let multiplier = self.current_multiplier(now);
                debug_assert!(multiplier < crash_point || crash_point == Multiplier::ONE);
                Ok(multiplier)
            }
            RoundState::Crashed { .. } => Err(GameError::RoundClosed { round_id: self.round_id }),
        }
    }

    /// Read-only archive record; `None` until the round has crashed
    pub fn archive(&self, bets: Vec<Bet>) -> Option<RoundRecord> {
        let RoundState::Crashed { crashed_at, crash_point } = self.state else {
            return None;
        };

        debug_assert!(bets.iter().all(|bet| bet.outcome != BetOutcome::Pending));
        let total_staked = bets.iter().fold(Amount::ZERO, |acc, bet| acc.saturating_add(bet.stake));
        let total_paid_out = bets.iter().fold(Amount::ZERO, |acc, bet| acc.saturating_add(bet.payout));

        Some(RoundRecord {
            round_id: self.round_id,
            crash_point,
            seed: self.seed.to_hex(),
            seed_hash: self.seed_hash.clone(),
            countdown_ends_at: self.countdown_ends_at,
            started_at: self.countdown_ends_at,
            crashed_at,
            bets,
            total_staked,
            total_paid_out,
        })
    }
}
