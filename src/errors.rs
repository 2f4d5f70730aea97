//! Error types for the Aviator game server
//!
//! `GameError` is the caller-facing taxonomy returned synchronously by bet
//! placement and cash-out. None of these variants stop the round clock.
//! `AviatorError` is the root error for startup, configuration and the
//! persistence collaborator.

use crate::games::types::{Amount, BetId, RoundId};
use thiserror::Error;

/// Recoverable gameplay errors reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Stake must be greater than zero")]
    InvalidStake,

    #[error("Stake {stake} outside allowed range {min}..={max}")]
    StakeOutOfRange { stake: Amount, min: Amount, max: Amount },

    #[error("Auto cash-out must be a finite multiplier of at least {min}")]
    InvalidAutoCashOut { min: String },

    #[error("Round {round_id} is not accepting bets")]
    RoundNotAcceptingBets { round_id: RoundId },

    #[error("Round {round_id} has not started yet")]
    RoundNotStarted { round_id: RoundId },

    #[error("User already has a bet in round {round_id}")]
    DuplicateBet { round_id: RoundId },

    #[error("Round {round_id} is closed")]
    RoundClosed { round_id: RoundId },

    #[error("Bet {bet_id} is already resolved")]
    AlreadyResolved { bet_id: BetId },

    #[error("Bet {bet_id} not found")]
    BetNotFound { bet_id: BetId },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    #[error("Account service unavailable: {0}")]
    AccountUnavailable(String),
}

impl GameError {
    /// Stable machine-readable code used by the API and WebSocket replies
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidStake => "INVALID_STAKE",
            GameError::StakeOutOfRange { .. } => "STAKE_OUT_OF_RANGE",
            GameError::InvalidAutoCashOut { .. } => "INVALID_AUTO_CASH_OUT",
            GameError::RoundNotAcceptingBets { .. } => "ROUND_NOT_ACCEPTING_BETS",
            GameError::RoundNotStarted { .. } => "ROUND_NOT_STARTED",
            GameError::DuplicateBet { .. } => "DUPLICATE_BET",
            GameError::RoundClosed { .. } => "ROUND_CLOSED",
            GameError::AlreadyResolved { .. } => "ALREADY_RESOLVED",
            GameError::BetNotFound { .. } => "BET_NOT_FOUND",
            GameError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            GameError::AccountUnavailable(_) => "ACCOUNT_UNAVAILABLE",
        }
    }
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// Persistence collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Root error type for all Aviator operations
#[derive(Debug, Error)]
pub enum AviatorError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Game error: {0}")]
    Game(#[from] GameError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AviatorResult<T> = Result<T, AviatorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = AviatorError::from(ConfigurationError::ValidationFailed("test".to_string()));
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("test"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_game_error_codes() {
        assert_eq!(GameError::RoundClosed { round_id: 3 }.code(), "ROUND_CLOSED");
        assert_eq!(GameError::AlreadyResolved { bet_id: 9 }.code(), "ALREADY_RESOLVED");
        assert!(GameError::DuplicateBet { round_id: 4 }.to_string().contains("round 4"));
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = GameError::InsufficientBalance {
            requested: Amount::from_cents(1_000),
            available: Amount::from_cents(250),
        };
        assert!(err.to_string().contains("10.00"));
        assert!(err.to_string().contains("2.50"));
    }
}
