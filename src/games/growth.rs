//! Multiplier growth curve: `value(t) = exp(r * t)`, `t` in elapsed milliseconds.

use crate::games::types::Multiplier;

/// Deterministic, strictly increasing growth function of elapsed time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthCurve {
    rate_per_ms: f64,
}

impl GrowthCurve {
    /// `rate_per_second` must be finite and positive; validated by config
    pub fn new(rate_per_second: f64) -> Self {
        Self {
            rate_per_ms: rate_per_second / 1000.0,
        }
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_ms * 1000.0
    }

    /// Exact curve value at `elapsed_ms`
    pub fn value_at(&self, elapsed_ms: u64) -> f64 {
        (self.rate_per_ms * elapsed_ms as f64).exp()
    }

    /// Quoted multiplier at `elapsed_ms`, floored to hundredths
    pub fn multiplier_at(&self, elapsed_ms: u64) -> Multiplier {
        Multiplier::floor_f64(self.value_at(elapsed_ms)).max(Multiplier::ONE)
    }

    /// Smallest elapsed time at which the quoted multiplier reaches `target`
    pub fn elapsed_to_reach(&self, target: Multiplier) -> u64 {
        if target <= Multiplier::ONE {
            return 0;
        }
        let estimate = (target.as_f64().ln() / self.rate_per_ms).ceil().max(0.0) as u64;

        // Float rounding can put the estimate one step either side of the
        // first millisecond whose floored quote reaches the target.
        let mut elapsed = estimate.saturating_sub(1);
        while self.multiplier_at(elapsed) < target {
            elapsed += 1;
        }
        elapsed
    }
}

impl Default for GrowthCurve {
    /// +1% every 100 ms
    fn default() -> Self {
        Self::new(10.0 * 1.01f64.ln())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one() {
        let curve = GrowthCurve::default();
        assert_eq!(curve.multiplier_at(0), Multiplier::ONE);
        assert!((curve.value_at(0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strictly_increasing_and_deterministic() {
        let curve = GrowthCurve::default();
        let mut previous = curve.value_at(0);
        for t in (1..60_000).step_by(7) {
            let value = curve.value_at(t);
            assert!(value > previous, "value not increasing at t={}", t);
            assert_eq!(value, curve.value_at(t));
            previous = value;
        }
    }

    #[test]
    fn test_default_rate_matches_one_percent_per_100ms() {
        let curve = GrowthCurve::default();
        assert_eq!(curve.multiplier_at(100), Multiplier::from_hundredths(101));
        assert_eq!(curve.multiplier_at(1_000), Multiplier::from_hundredths(110));
    }

    #[test]
    fn test_elapsed_to_reach_is_first_matching_millisecond() {
        let curve = GrowthCurve::default();
        for hundredths in [101u64, 150, 180, 200, 1_000, 100_000] {
            let target = Multiplier::from_hundredths(hundredths);
            let t = curve.elapsed_to_reach(target);
            assert!(curve.multiplier_at(t) >= target);
            assert!(curve.multiplier_at(t - 1) < target, "target {} reached before t={}", target, t);
        }
        assert_eq!(curve.elapsed_to_reach(Multiplier::ONE), 0);
    }
}
