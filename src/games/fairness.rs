//! Provably fair crash point generation.
//!
//! Each round's seed is derived from the server secret and the round id. The
//! SHA-256 of the seed is published before the round runs; the seed itself is
//! revealed after the crash so anyone can recompute the crash point with
//! [`verify_round`].
//!
//! Crash curve: with `x` the top 52 bits of `SHA-256(seed || "crash")`,
//! `crash = floor((1 - edge) / (1 - x / 2^52))` in hundredths, floored at
//! 1.00x and capped at the configured maximum. This yields
//! `P(crash >= m) = (1 - edge) / m`, so the return to player is `1 - edge`.

use crate::{
    config::FairnessConfig,
    errors::{AviatorResult, ConfigurationError},
    games::types::{Multiplier, RoundId},
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const CRASH_DOMAIN: &[u8] = b"crash";
const ENTROPY_BITS: u32 = 52;
const BASIS_POINTS: u128 = 10_000;

/// 32-byte per-round seed
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RoundSeed([u8; 32]);

impl RoundSeed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, VerifyError> {
        let bytes = hex::decode(value.trim()).map_err(|e| VerifyError::InvalidSeed(e.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidSeed("seed must be 32 bytes".to_string()))?;
        Ok(Self(array))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Public commitment: hex SHA-256 of the seed
    pub fn commitment(&self) -> String {
        hex::encode(Sha256::digest(self.0))
    }

    /// Top 52 bits of `SHA-256(seed || "crash")`
    fn entropy(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(CRASH_DOMAIN);
        let digest = hasher.finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head) >> (64 - ENTROPY_BITS)
    }
}

// Seeds stay secret until the crash; keep them out of debug logs.
impl fmt::Debug for RoundSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundSeed({}..)", &self.commitment()[..8])
    }
}

/// Map 52 bits of entropy to a crash point using integer arithmetic only
pub fn crash_point_from_entropy(entropy: u64, house_edge_bps: u32, max_multiplier: Multiplier) -> Multiplier {
    let space = 1u128 << ENTROPY_BITS;
    let x = (entropy as u128) & (space - 1);
    let edge = (house_edge_bps as u128).min(BASIS_POINTS);

    let numerator = (BASIS_POINTS - edge) * space;
    let denominator = (space - x) * 100;
    let hundredths = (numerator / denominator).min(u64::MAX as u128) as u64;

    Multiplier::from_hundredths(hundredths)
        .max(Multiplier::ONE)
        .min(max_multiplier)
}

pub fn crash_point_from_seed(seed: &RoundSeed, house_edge_bps: u32, max_multiplier: Multiplier) -> Multiplier {
    crash_point_from_entropy(seed.entropy(), house_edge_bps, max_multiplier)
}

/// Source of per-round seeds and crash points
pub trait CrashPointSource: Send + Sync {
    fn generate(&self, round_id: RoundId) -> (RoundSeed, Multiplier);
}

/// Deterministic crash point generator. Pure; safe to share across threads.
#[derive(Clone)]
pub struct CrashGenerator {
    secret: Vec<u8>,
    house_edge_bps: u32,
    max_multiplier: Multiplier,
}

impl CrashGenerator {
    pub fn new(secret: Vec<u8>, house_edge_bps: u32, max_multiplier: Multiplier) -> Self {
        Self {
            secret,
            house_edge_bps,
            max_multiplier,
        }
    }

    /// Build from configuration, generating a random secret when none is set
    pub fn from_config(config: &FairnessConfig) -> AviatorResult<Self> {
        let secret = match &config.server_secret {
            Some(secret_hex) => hex::decode(secret_hex.trim()).map_err(|e| ConfigurationError::InvalidValue {
                field: "fairness.server_secret".to_string(),
                value: "<redacted>".to_string(),
                reason: e.to_string(),
            })?,
            None => {
                tracing::warn!("No fairness.server_secret configured; generating an ephemeral secret");
                let mut bytes = [0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                bytes.to_vec()
            }
        };

        Ok(Self::new(secret, config.house_edge_bps, config.max_multiplier()))
    }

    /// `SHA-256(secret || ":" || round_id_be)`
    pub fn round_seed(&self, round_id: RoundId) -> RoundSeed {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b":");
        hasher.update(round_id.to_be_bytes());
        RoundSeed(hasher.finalize().into())
    }

    pub fn house_edge_bps(&self) -> u32 {
        self.house_edge_bps
    }

    pub fn max_multiplier(&self) -> Multiplier {
        self.max_multiplier
    }
}

impl CrashPointSource for CrashGenerator {
    fn generate(&self, round_id: RoundId) -> (RoundSeed, Multiplier) {
        let seed = self.round_seed(round_id);
        let crash_point = crash_point_from_seed(&seed, self.house_edge_bps, self.max_multiplier);
        (seed, crash_point)
    }
}

/// Everything a player needs to re-derive a finished round's crash point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FairnessProof {
    pub round_id: RoundId,
    pub seed: String,
    pub seed_hash: String,
    pub crash_point: Multiplier,
    pub house_edge_bps: u32,
    pub max_multiplier: Multiplier,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Seed hash mismatch: published {expected}, computed {actual}")]
    CommitmentMismatch { expected: String, actual: String },
}

/// Recompute a crash point from a revealed seed, optionally checking it
/// against the commitment published before the round.
pub fn verify_round(
    seed_hex: &str,
    expected_seed_hash: Option<&str>,
    house_edge_bps: u32,
    max_multiplier: Multiplier,
) -> Result<Multiplier, VerifyError> {
    let seed = RoundSeed::from_hex(seed_hex)?;

    if let Some(expected) = expected_seed_hash {
        let actual = seed.commitment();
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(VerifyError::CommitmentMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    Ok(crash_point_from_seed(&seed, house_edge_bps, max_multiplier))
}
