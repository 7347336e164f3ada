//! Threshold tier tables

use super::types::Tier;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Percent cut-offs for the dominant share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTiers {
    pub building: Decimal,
    pub ready: Decimal,
    pub strong: Decimal,
}

impl ThresholdTiers {
    pub fn new(building: Decimal, ready: Decimal, strong: Decimal) -> Self {
        Self {
            building,
            ready,
            strong,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.building <= self.ready && self.ready <= self.strong
    }

    pub fn classify(&self, share: Decimal) -> Tier {
        if share >= self.strong {
            Tier::Strong
        } else if share >= self.ready {
            Tier::Ready
        } else if share >= self.building {
            Tier::Building
        } else {
            Tier::Below
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_boundaries_are_inclusive() {
        let tiers = ThresholdTiers::new(dec!(52), dec!(55), dec!(58));
        assert_eq!(tiers.classify(dec!(51.99)), Tier::Below);
        assert_eq!(tiers.classify(dec!(52)), Tier::Building);
        assert_eq!(tiers.classify(dec!(55)), Tier::Ready);
        assert_eq!(tiers.classify(dec!(58)), Tier::Strong);
        assert!(tiers.is_ordered());
        assert!(!ThresholdTiers::new(dec!(60), dec!(55), dec!(70)).is_ordered());
    }
}
