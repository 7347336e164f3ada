//! Martingale stake sizing

use super::types::RiskError;
use rust_decimal::{Decimal, RoundingStrategy};

/// Stake = base × multiplier^level, capped at a fraction of balance
#[derive(Debug, Clone, PartialEq)]
pub struct MartingaleSizer {
    pub base_stake: Decimal,
    pub multiplier: Decimal,
    pub max_level: u32,
    pub max_stake_fraction: Decimal,
    pub min_stake: Decimal,
}

impl MartingaleSizer {
    /// Uncapped stake for `level`, rounded to cents; levels past the maximum
    /// are clamped and an overflowing product saturates at `Decimal::MAX`
    pub fn raw_stake(&self, level: u32) -> Decimal {
        self.grown(level, Decimal::MAX)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// base × multiplier^level, no longer multiplied once it reaches `ceiling`
    fn grown(&self, level: u32, ceiling: Decimal) -> Decimal {
        let mut stake = self.base_stake;
        for _ in 0..level.min(self.max_level) {
            if stake >= ceiling {
                break;
            }
            stake = match stake.checked_mul(self.multiplier) {
                Some(next) => next,
                None => return Decimal::MAX,
            };
        }
        stake
    }

    /// Stake for `level` under the balance cap
    pub fn stake(&self, level: u32, balance: Decimal) -> Result<Decimal, RiskError> {
        let cap = (balance * self.max_stake_fraction)
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let wanted = self
            .grown(level, cap)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let stake = wanted.min(cap);
        if stake <= Decimal::ZERO || stake < self.min_stake {
            return Err(RiskError::StakeUnavailable { wanted, cap });
        }
        Ok(stake)
    }
}
