//! # Exponential Backoff
//!
//! Delay before retrying a failed status query: `base × 2^(n-1)`, capped at
//! `base × max_factor`, with ±10% jitter so shards that failed together do
//! not retry in lockstep.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max_factor: u32,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max_factor: 16,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Deterministic delay for the `failures`-th consecutive failure (1-based)
    pub fn nominal(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let factor = (1u32 << exp).min(self.max_factor.max(1));
        self.base.saturating_mul(factor)
    }

    /// Nominal delay with random jitter applied
    pub fn delay(&self, failures: u32) -> Duration {
        let nominal = self.nominal(failures);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let scale = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(scale)
    }
}
