//! Round state events fanned out to real-time subscribers

use crate::games::{
    settlement::SettlementRecord,
    types::{Amount, Bet, BetId, CashOutTrigger, Millis, Multiplier, RoundId, UserId},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundStateEvent {
    /// New round open for bets; the seed commitment is published here
    WaitingStarted {
        round_id: RoundId,
        seed_hash: String,
        countdown_ends_at: Millis,
    },

    RoundStarted { round_id: RoundId, started_at: Millis },

    MultiplierTick {
        round_id: RoundId,
        multiplier: Multiplier,
        elapsed_ms: u64,
    },

    /// Crash point and raw seed revealed
    RoundCrashed {
        round_id: RoundId,
        crash_point: Multiplier,
        crashed_at: Millis,
        seed: String,
    },

    BetPlaced {
        round_id: RoundId,
        bet_id: BetId,
        user_id: UserId,
        stake: Amount,
        #[serde(skip_serializing_if = "Option::is_none")]
        auto_cash_out: Option<Multiplier>,
    },

    BetCashedOut {
        round_id: RoundId,
        bet_id: BetId,
        user_id: UserId,
        multiplier: Multiplier,
        payout: Amount,
        trigger: CashOutTrigger,
    },
}

impl RoundStateEvent {
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundStateEvent::WaitingStarted { round_id, .. }
            | RoundStateEvent::RoundStarted { round_id, .. }
            | RoundStateEvent::MultiplierTick { round_id, .. }
            | RoundStateEvent::RoundCrashed { round_id, .. }
            | RoundStateEvent::BetPlaced { round_id, .. }
            | RoundStateEvent::BetCashedOut { round_id, .. } => *round_id,
        }
    }

    pub fn bet_placed(bet: &Bet) -> Self {
        RoundStateEvent::BetPlaced {
            round_id: bet.round_id,
            bet_id: bet.id,
            user_id: bet.user_id.clone(),
            stake: bet.stake,
            auto_cash_out: bet.auto_cash_out,
        }
    }

    /// `None` for losing records
    pub fn cashed_out(record: &SettlementRecord) -> Option<Self> {
        Some(RoundStateEvent::BetCashedOut {
            round_id: record.round_id,
            bet_id: record.bet_id,
            user_id: record.user_id.clone(),
            multiplier: record.multiplier?,
            payout: record.payout,
            trigger: record.trigger?,
        })
    }
}

/// Broadcast publisher. Publishing never blocks and never fails the caller.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<RoundStateEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: RoundStateEvent) {
        if let Err(e) = self.tx.send(event) {
            // No subscribers right now
            trace!("Event dropped: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundStateEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
