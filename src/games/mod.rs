//! Crash game engine: fair crash points, round lifecycle, bets and settlement

pub mod events;
pub mod fairness;
pub mod growth;
pub mod history;
pub mod ledger;
pub mod round;
pub mod scheduler;
pub mod settlement;
pub mod types;

pub use events::{EventPublisher, RoundStateEvent};
pub use fairness::{verify_round, CrashGenerator, CrashPointSource, FairnessProof, RoundSeed, VerifyError};
pub use growth::GrowthCurve;
pub use history::{HistoryWriter, InMemoryHistory, JsonlHistory, RoundHistory};
pub use ledger::{BetLedger, BetLimits};
pub use round::{RoundState, RoundStateMachine, Transition};
pub use scheduler::{RoundScheduler, SchedulerSettings};
pub use settlement::{
    AccountError, AccountService, Finalization, InMemoryAccounts, Resolution, SettlementEngine, SettlementRecord,
};
pub use types::*;
