use serde::{Deserialize, Serialize};
use std::fmt;

pub type RoundId = u64;
pub type BetId = u64;
pub type UserId = String;

/// Timestamp in milliseconds since the Unix epoch
pub type Millis = u64;

/// Money in minor units (cents)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Parse a decimal amount in major units (e.g. `12.5` dollars).
    /// Rejects negative, non-finite and sub-cent values.
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let scaled = value * 100.0;
        let cents = scaled.round();
        if (scaled - cents).abs() > 1e-6 || cents > u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Payout multiplier in hundredths (1.00x == 100).
///
/// Serialized as a decimal number so clients see `1.8` rather than `180`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(100);

    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self(hundredths)
    }

    pub const fn hundredths(self) -> u64 {
        self.0
    }

    /// Round a decimal multiplier to the nearest hundredth
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 || value > (u64::MAX / 100) as f64 {
            return None;
        }
        Some(Self((value * 100.0).round() as u64))
    }

    /// Truncate a decimal multiplier down to hundredths
    pub fn floor_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self(0);
        }
        // Absorb representation error so exp(ln(1.8)) still quotes 1.80x
        Self((value * 100.0 + 1e-7).floor() as u64)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// The multiplier one hundredth below this one (never below 1.00x)
    pub fn previous(self) -> Self {
        Self(self.0.saturating_sub(1).max(Self::ONE.0))
    }

    /// `floor(stake * self)` in cents, `None` on overflow
    pub fn payout(self, stake: Amount) -> Option<Amount> {
        let value = (stake.cents() as u128).checked_mul(self.0 as u128)? / 100;
        u64::try_from(value).ok().map(Amount::from_cents)
    }
}

impl TryFrom<f64> for Multiplier {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Multiplier::from_f64(value).ok_or_else(|| format!("invalid multiplier: {}", value))
    }
}

impl From<Multiplier> for f64 {
    fn from(value: Multiplier) -> Self {
        value.as_f64()
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

/// Public lifecycle status of a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Running,
    Crashed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Waiting => write!(f, "waiting"),
            RoundStatus::Running => write!(f, "running"),
            RoundStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// Bet outcome state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetOutcome {
    Pending,
    CashedOut,
    Lost,
}

/// What triggered a cash-out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CashOutTrigger {
    Manual,
    Auto,
}

/// A single bet in one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: BetId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub stake: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cash_out: Option<Multiplier>,
    pub outcome: BetOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_multiplier: Option<Multiplier>,
    pub payout: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<CashOutTrigger>,
    pub placed_at: Millis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<Millis>,
}

impl Bet {
    pub fn new(
        id: BetId,
        round_id: RoundId,
        user_id: UserId,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        placed_at: Millis,
    ) -> Self {
        Self {
            id,
            round_id,
            user_id,
            stake,
            auto_cash_out,
            outcome: BetOutcome::Pending,
            realized_multiplier: None,
            payout: Amount::ZERO,
            trigger: None,
            placed_at,
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == BetOutcome::Pending
    }
}

/// Read-only view of the active round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub status: RoundStatus,
    pub multiplier: Multiplier,
    pub elapsed_ms: u64,
    pub countdown_ends_at: Millis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crashed_at: Option<Millis>,
    /// Revealed only once the round has crashed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<Multiplier>,
    pub seed_hash: String,
    /// Revealed only once the round has crashed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub bets: Vec<Bet>,
    pub server_time: Millis,
}

/// Archived, read-only record of a finished round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRecord {
    pub round_id: RoundId,
    pub crash_point: Multiplier,
    pub seed: String,
    pub seed_hash: String,
    pub countdown_ends_at: Millis,
    pub started_at: Millis,
    pub crashed_at: Millis,
    pub bets: Vec<Bet>,
    pub total_staked: Amount,
    pub total_paid_out: Amount,
}

impl RoundRecord {
    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            round_id: self.round_id,
            crash_point: self.crash_point,
            crashed_at: self.crashed_at,
            bet_count: self.bets.len(),
            total_staked: self.total_staked,
            total_paid_out: self.total_paid_out,
        }
    }
}

/// Compact history entry (the "recent results" strip)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub crash_point: Multiplier,
    pub crashed_at: Millis,
    pub bet_count: usize,
    pub total_staked: Amount,
    pub total_paid_out: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_decimal_parsing() {
        assert_eq!(Amount::from_decimal(10.0), Some(Amount::from_cents(1_000)));
        assert_eq!(Amount::from_decimal(61.25), Some(Amount::from_cents(6_125)));
        assert_eq!(Amount::from_decimal(0.001), None);
        assert_eq!(Amount::from_decimal(-1.0), None);
        assert_eq!(Amount::from_decimal(f64::NAN), None);
        assert_eq!(Amount::from_cents(1_805).to_string(), "18.05");
    }

    #[test]
    fn test_multiplier_payout_is_floored_cents() {
        let m = Multiplier::from_hundredths(180);
        assert_eq!(m.payout(Amount::from_cents(1_000)), Some(Amount::from_cents(1_800)));

        // 0.33 * 1.50 = 0.495 -> 0.49
        let m = Multiplier::from_hundredths(150);
        assert_eq!(m.payout(Amount::from_cents(33)), Some(Amount::from_cents(49)));

        assert_eq!(Multiplier::from_hundredths(u64::MAX).payout(Amount::from_cents(u64::MAX)), None);
    }

    #[test]
    fn test_multiplier_serializes_as_decimal() {
        let json = serde_json::to_string(&Multiplier::from_hundredths(245)).unwrap();
        assert_eq!(json, "2.45");

        let parsed: Multiplier = serde_json::from_str("1.2").unwrap();
        assert_eq!(parsed, Multiplier::from_hundredths(120));
        assert_eq!(parsed.to_string(), "1.20x");
    }

    #[test]
    fn test_multiplier_floor_and_previous() {
        assert_eq!(Multiplier::floor_f64(1.799_999_999_9), Multiplier::from_hundredths(180));
        assert_eq!(Multiplier::floor_f64(1.809), Multiplier::from_hundredths(180));
        assert_eq!(Multiplier::ONE.previous(), Multiplier::ONE);
        assert_eq!(Multiplier::from_hundredths(200).previous(), Multiplier::from_hundredths(199));
    }
}
