//! API Data Models
//!
//! Request and response types for the HTTP API. Request bodies accept
//! camelCase field names (snake_case aliases are tolerated); responses use
//! snake_case like the event stream.

use crate::errors::GameError;
use crate::games::{
    fairness::FairnessProof,
    ledger::BetLimits,
    settlement::SettlementRecord,
    types::{Amount, Bet, BetId, Millis, Multiplier, RoundId, RoundRecord, RoundSnapshot, RoundSummary},
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Convert engine milliseconds into a UTC timestamp
pub fn to_datetime(ms: Millis) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_default()
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub round_id: RoundId,
    pub uptime_seconds: u64,
}

/// Current round plus server time for client clock alignment
#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentRoundResponse {
    #[serde(flatten)]
    pub round: RoundSnapshot,
    pub server_time_iso: DateTime<Utc>,
}

/// Bet placement body: `amount` is in major units (e.g. `10.00`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    pub amount: f64,
    #[serde(default, alias = "auto_cash_out")]
    pub auto_cash_out: Option<f64>,
    #[serde(default, alias = "round_id")]
    pub round_id: Option<RoundId>,
}

impl PlaceBetRequest {
    /// Convert client decimals into engine units
    pub fn parse(&self, limits: &BetLimits) -> Result<(Amount, Option<Multiplier>), GameError> {
        parse_bet_values(self.amount, self.auto_cash_out, limits)
    }
}

/// Shared by the HTTP and WebSocket bet paths
pub fn parse_bet_values(
    amount: f64,
    auto_cash_out: Option<f64>,
    limits: &BetLimits,
) -> Result<(Amount, Option<Multiplier>), GameError> {
    let stake = Amount::from_decimal(amount).ok_or(GameError::InvalidStake)?;
    let auto_cash_out = match auto_cash_out {
        None => None,
        Some(value) => Some(Multiplier::from_f64(value).ok_or_else(|| {
            GameError::InvalidAutoCashOut {
                min: limits.min_auto_cash_out.to_string(),
            }
        })?),
    };
    Ok((stake, auto_cash_out))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOutRequest {
    #[serde(alias = "bet_id")]
    pub bet_id: BetId,
    /// Multiplier the client displayed; informational only
    #[serde(default, alias = "observed_multiplier")]
    pub observed_multiplier: Option<f64>,
}

impl CashOutRequest {
    pub fn observed(&self) -> Option<Multiplier> {
        self.observed_multiplier.and_then(Multiplier::from_f64)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceBetResponse {
    pub bet: Bet,
    pub placed_at_iso: DateTime<Utc>,
}

impl From<Bet> for PlaceBetResponse {
    fn from(bet: Bet) -> Self {
        let placed_at_iso = to_datetime(bet.placed_at);
        Self { bet, placed_at_iso }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CashOutResponse {
    #[serde(flatten)]
    pub settlement: SettlementRecord,
    pub resolved_at_iso: DateTime<Utc>,
}

impl From<SettlementRecord> for CashOutResponse {
    fn from(settlement: SettlementRecord) -> Self {
        let resolved_at_iso = to_datetime(settlement.resolved_at);
        Self { settlement, resolved_at_iso }
    }
}

/// History query parameters
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round_id: RoundId,
    pub crash_point: Multiplier,
    pub crashed_at: DateTime<Utc>,
    pub bet_count: usize,
    pub total_staked: Amount,
    pub total_paid_out: Amount,
}

impl From<RoundSummary> for HistoryEntry {
    fn from(summary: RoundSummary) -> Self {
        Self {
            round_id: summary.round_id,
            crash_point: summary.crash_point,
            crashed_at: to_datetime(summary.crashed_at),
            bet_count: summary.bet_count,
            total_staked: summary.total_staked,
            total_paid_out: summary.total_paid_out,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub rounds: Vec<HistoryEntry>,
}

/// Full archived round with its fairness proof
#[derive(Debug, Serialize, Deserialize)]
pub struct RoundDetailResponse {
    #[serde(flatten)]
    pub record: RoundRecord,
    pub proof: FairnessProof,
    pub started_at_iso: DateTime<Utc>,
    pub crashed_at_iso: DateTime<Utc>,
}

impl RoundDetailResponse {
    pub fn new(record: RoundRecord, house_edge_bps: u32, max_multiplier: Multiplier) -> Self {
        let proof = FairnessProof {
            round_id: record.round_id,
            seed: record.seed.clone(),
            seed_hash: record.seed_hash.clone(),
            crash_point: record.crash_point,
            house_edge_bps,
            max_multiplier,
        };
        Self {
            started_at_iso: to_datetime(record.started_at),
            crashed_at_iso: to_datetime(record.crashed_at),
            proof,
            record,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub seed: String,
    #[serde(default, alias = "seed_hash")]
    pub seed_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub crash_point: Multiplier,
    pub seed_hash: String,
    pub house_edge_bps: u32,
    pub max_multiplier: Multiplier,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: String,
    /// Minor units
    pub balance: Amount,
    pub balance_display: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_bet_request_accepts_both_casings() {
        let camel: PlaceBetRequest =
            serde_json::from_str(r#"{"amount": 10.0, "autoCashOut": 2.5, "roundId": 4}"#).unwrap();
        let snake: PlaceBetRequest =
            serde_json::from_str(r#"{"amount": 10.0, "auto_cash_out": 2.5, "round_id": 4}"#).unwrap();

        for request in [camel, snake] {
            let (stake, auto) = request.parse(&BetLimits::default()).unwrap();
            assert_eq!(stake, Amount::from_cents(1_000));
            assert_eq!(auto, Some(Multiplier::from_hundredths(250)));
            assert_eq!(request.round_id, Some(4));
        }
    }

    #[test]
    fn test_parse_rejects_sub_cent_and_negative_amounts() {
        let limits = BetLimits::default();
        assert_eq!(parse_bet_values(0.001, None, &limits), Err(GameError::InvalidStake));
        assert_eq!(parse_bet_values(-5.0, None, &limits), Err(GameError::InvalidStake));
        assert!(matches!(
            parse_bet_values(5.0, Some(f64::INFINITY), &limits),
            Err(GameError::InvalidAutoCashOut { .. })
        ));
    }

    #[test]
    fn test_datetime_conversion() {
        assert_eq!(to_datetime(0).timestamp_millis(), 0);
        assert_eq!(to_datetime(1_500).timestamp_millis(), 1_500);
    }
}
