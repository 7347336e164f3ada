//! Even/odd and over/under bias strategies

use super::strategy::{BiasParams, Strategy};
use super::types::{ContractType, Decision, Signal, StrategyId, Tier};
use super::window::TickWindow;
use rust_decimal::Decimal;

/// The two digit classes a bias strategy compares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasClasses {
    EvenOdd,
    /// Digits below `split` against the rest
    OverUnder { split: u8 },
}

/// One side of a bias comparison
#[derive(Debug, Clone, Copy)]
struct Side {
    label: &'static str,
    contract: ContractType,
    barrier: Option<u8>,
}

impl Side {
    fn contains(&self, digit: u8) -> bool {
        self.contract.wins(digit, self.barrier)
    }
}

impl BiasClasses {
    fn sides(self) -> [Side; 2] {
        match self {
            BiasClasses::EvenOdd => [
                Side {
                    label: "even",
                    contract: ContractType::DigitEven,
                    barrier: None,
                },
                Side {
                    label: "odd",
                    contract: ContractType::DigitOdd,
                    barrier: None,
                },
            ],
            BiasClasses::OverUnder { split } => [
                Side {
                    label: "under",
                    contract: ContractType::DigitUnder,
                    barrier: Some(split),
                },
                Side {
                    label: "over",
                    contract: ContractType::DigitOver,
                    barrier: Some(split.saturating_sub(1)),
                },
            ],
        }
    }
}

/// Enters on the dominant class once its share clears the ready tier and is
/// still rising
pub struct BiasStrategy {
    id: StrategyId,
    classes: BiasClasses,
    params: BiasParams,
}

impl BiasStrategy {
    pub fn new(id: StrategyId, classes: BiasClasses, params: BiasParams) -> Self {
        Self {
            id,
            classes,
            params,
        }
    }

    pub fn params(&self) -> &BiasParams {
        &self.params
    }
}

impl Strategy for BiasStrategy {
    fn id(&self) -> StrategyId {
        self.id
    }

    fn evaluate(&mut self, window: &TickWindow) -> Signal {
        if window.len() < self.params.min_samples {
            return Signal::none(
                self.id,
                format!("collecting samples {}/{}", window.len(), self.params.min_samples),
            );
        }

        if let Some(ceiling) = self.params.max_entropy {
            let entropy = window.digit_stats().entropy;
            if entropy > ceiling {
                return Signal::none(
                    self.id,
                    format!("entropy {entropy:.3} above {ceiling:.3}"),
                );
            }
        }

        let [a, b] = self.classes.sides();
        let share_a = window.share(|d| a.contains(d));
        let share_b = window.share(|d| b.contains(d));
        let (side, share) = match share_a.cmp(&share_b) {
            std::cmp::Ordering::Greater => (a, share_a),
            std::cmp::Ordering::Less => (b, share_b),
            std::cmp::Ordering::Equal => {
                return Signal::none(self.id, format!("{} and {} balanced", a.label, b.label))
            }
        };

        let tier = self.params.tiers.classify(share);
        let signal = Signal::new(self.id, Decision::None, tier)
            .with_contract(side.contract, side.barrier)
            .with_confidence(share);

        match tier {
            Tier::Below => signal.with_note(format!("{} {share}% below building", side.label)),
            Tier::Building => Signal {
                decision: Decision::Wait,
                ..signal.with_note(format!("{} building at {share}%", side.label))
            },
            Tier::Ready | Tier::Strong => {
                let trend = window.share_trend(self.params.trend_ticks, |d| side.contains(d));
                let rising = trend.len() >= self.params.trend_ticks
                    && trend.windows(2).all(|pair| pair[0] <= pair[1]);
                if rising {
                    Signal {
                        decision: Decision::Enter,
                        ..signal.with_note(format!("{} dominant at {share}%", side.label))
                    }
                } else {
                    Signal {
                        decision: Decision::Wait,
                        ..signal.with_note(format!("{} at {share}% but fading", side.label))
                    }
                }
            }
        }
    }

    fn contract_types(&self) -> Vec<ContractType> {
        self.classes.sides().iter().map(|s| s.contract).collect()
    }
}
