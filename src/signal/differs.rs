//! Rarity ("differs") strategy

use super::strategy::{RarityParams, Strategy};
use super::types::{ContractType, Decision, Signal, StrategyId, Tier};
use super::window::{DigitStats, TickWindow};
use rust_decimal::Decimal;

/// Progress towards a differs entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RarityState {
    /// Looking for a rare digit; `excluded` just reappeared and is skipped once
    Searching { excluded: Option<u8> },
    /// Watching a rare digit's share fall
    Candidate {
        digit: u8,
        last_share: Decimal,
        declines: usize,
    },
    /// Waiting for the digit to stay absent from the latest samples
    Confirming { digit: u8 },
}

/// Bets that a rare digit in a restricted range will not settle the contract
pub struct DiffersStrategy {
    id: StrategyId,
    params: RarityParams,
    state: RarityState,
}

impl DiffersStrategy {
    pub fn new(id: StrategyId, params: RarityParams) -> Self {
        Self {
            id,
            params,
            state: RarityState::Searching { excluded: None },
        }
    }

    pub fn state(&self) -> RarityState {
        self.state
    }

    /// Rarest eligible digit: in range, neither the global most nor least
    /// frequent, below the rarity threshold. Ties go to the lowest digit.
    fn pick_candidate(&self, stats: &DigitStats, excluded: Option<u8>) -> Option<u8> {
        (self.params.low..=self.params.high.min(9))
            .filter(|d| Some(*d) != excluded)
            .filter(|d| *d != stats.most_frequent && *d != stats.least_frequent)
            .filter(|d| stats.percentage(*d) < self.params.threshold)
            .min_by(|a, b| {
                stats
                    .percentage(*a)
                    .cmp(&stats.percentage(*b))
                    .then(a.cmp(b))
            })
    }

    fn search(&mut self, stats: &DigitStats, excluded: Option<u8>) -> Signal {
        match self.pick_candidate(stats, excluded) {
            Some(digit) => {
                let share = stats.percentage(digit);
                self.state = RarityState::Candidate {
                    digit,
                    last_share: share,
                    declines: 0,
                };
                Signal::new(self.id, Decision::Wait, Tier::Building)
                    .with_contract(ContractType::DigitDiff, Some(digit))
                    .with_confidence(Decimal::ONE_HUNDRED - share)
                    .with_note(format!("candidate {digit} at {share}%"))
            }
            None => {
                self.state = RarityState::Searching { excluded };
                Signal::none(self.id, "no rare digit in range")
            }
        }
    }
}

impl Strategy for DiffersStrategy {
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

        let stats = window.digit_stats();
        if let Some(ceiling) = self.params.max_entropy {
            if stats.entropy > ceiling {
                return Signal::none(
                    self.id,
                    format!("entropy {:.3} above {ceiling:.3}", stats.entropy),
                );
            }
        }

        match self.state {
            RarityState::Searching { excluded } => self.search(&stats, excluded),

            RarityState::Candidate {
                digit,
                last_share,
                declines,
            } => {
                let share = stats.percentage(digit);
                let reappeared = window.last_digits(1).any(|d| d == digit);
                if share >= self.params.threshold || reappeared {
                    return self.search(&stats, Some(digit));
                }
                if digit == stats.most_frequent || digit == stats.least_frequent {
                    return self.search(&stats, None);
                }
                let declines = if share <= last_share { declines + 1 } else { 0 };
                let signal = Signal::new(self.id, Decision::Wait, Tier::Building)
                    .with_contract(ContractType::DigitDiff, Some(digit))
                    .with_confidence(Decimal::ONE_HUNDRED - share);

                if declines >= self.params.decline_ticks {
                    self.state = RarityState::Confirming { digit };
                    Signal {
                        tier: Tier::Ready,
                        ..signal.with_note(format!("confirming absence of {digit}"))
                    }
                } else {
                    self.state = RarityState::Candidate {
                        digit,
                        last_share: share,
                        declines,
                    };
                    signal.with_note(format!(
                        "candidate {digit} at {share}% ({declines}/{})",
                        self.params.decline_ticks
                    ))
                }
            }

            RarityState::Confirming { digit } => {
                let reappeared = window
                    .last_digits(self.params.absence_ticks)
                    .any(|d| d == digit);
                if reappeared {
                    return self.search(&stats, Some(digit));
                }

                let share = stats.percentage(digit);
                let tier = if share * Decimal::TWO < self.params.threshold {
                    Tier::Strong
                } else {
                    Tier::Ready
                };
                self.state = RarityState::Searching { excluded: None };
                Signal::new(self.id, Decision::Enter, tier)
                    .with_contract(ContractType::DigitDiff, Some(digit))
                    .with_confidence(Decimal::ONE_HUNDRED - share)
                    .with_note(format!(
                        "{digit} absent from last {} ticks",
                        self.params.absence_ticks
                    ))
            }
        }
    }

    fn contract_types(&self) -> Vec<ContractType> {
        vec![ContractType::DigitDiff]
    }

    fn reset(&mut self) {
        self.state = RarityState::Searching { excluded: None };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::TickSample;
    use rust_decimal_macros::dec;

    fn sample(digit: u8) -> TickSample {
        TickSample::new("R_50", Decimal::new(250_00 + digit as i64, 2), 0, 2)
    }

    fn params() -> RarityParams {
        RarityParams {
            low: 2,
            high: 7,
            threshold: dec!(8),
            decline_ticks: 2,
            absence_ticks: 3,
            min_samples: 20,
            max_entropy: None,
        }
    }

    /// 40 samples where 3 appears once and 0 never does
    fn seeded_window() -> TickWindow {
        let mut window = TickWindow::new(40);
        window.push(sample(3));
        let filler = [1, 2, 4, 5, 6, 7, 8, 9, 1, 1];
        for i in 0..39 {
            window.push(sample(filler[i % filler.len()]));
        }
        window
    }

    #[test]
    fn test_walks_search_candidate_confirm_enter() {
        let mut strategy = DiffersStrategy::new(StrategyId::Differs, params());
        let mut window = seeded_window();

        let signal = strategy.evaluate(&window);
        assert_eq!(signal.decision, Decision::Wait);
        assert_eq!(signal.barrier, Some(3));
        assert!(matches!(strategy.state(), RarityState::Candidate { digit: 3, .. }));

        // The lone 3 is evicted, so its share keeps falling
        window.push(sample(5));
        strategy.evaluate(&window);
        window.push(sample(6));
        let signal = strategy.evaluate(&window);
        assert_eq!(signal.tier, Tier::Ready);
        assert_eq!(strategy.state(), RarityState::Confirming { digit: 3 });

        window.push(sample(4));
        let signal = strategy.evaluate(&window);
        assert_eq!(signal.decision, Decision::Enter);
        assert_eq!(signal.contract_type, Some(ContractType::DigitDiff));
        assert_eq!(signal.barrier, Some(3));
        assert!(signal.is_enter());
        assert_eq!(strategy.state(), RarityState::Searching { excluded: None });
    }

    #[test]
    fn test_reappearance_restarts_search_with_other_digit() {
        let mut strategy = DiffersStrategy::new(StrategyId::Differs, params());
        let mut window = seeded_window();
        strategy.evaluate(&window);
        window.push(sample(5));
        strategy.evaluate(&window);
        window.push(sample(6));
        strategy.evaluate(&window);
        assert_eq!(strategy.state(), RarityState::Confirming { digit: 3 });

        window.push(sample(3));
        let signal = strategy.evaluate(&window);
        assert_ne!(signal.decision, Decision::Enter);
        match strategy.state() {
            RarityState::Candidate { digit, .. } => assert_ne!(digit, 3),
            RarityState::Searching { excluded } => assert_eq!(excluded, Some(3)),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_candidate_seen_again_returns_to_search() {
        let mut strategy = DiffersStrategy::new(StrategyId::Differs, params());
        let mut window = seeded_window();
        strategy.evaluate(&window);
        assert!(matches!(
            strategy.state(),
            RarityState::Candidate { digit: 3, declines: 0, .. }
        ));

        // Evicts the old 3 while a new one arrives: the share does not move
        window.push(sample(3));
        let signal = strategy.evaluate(&window);
        assert_eq!(signal.decision, Decision::None);
        assert_eq!(strategy.state(), RarityState::Searching { excluded: Some(3) });
    }

    #[test]
    fn test_candidate_turned_least_frequent_is_dropped() {
        let mut strategy = DiffersStrategy::new(StrategyId::Differs, params());
        let mut window = TickWindow::new(40);
        window.push(sample(3));
        let filler = [0, 1, 2, 4, 5, 6, 7, 8, 9];
        for i in 0..39 {
            window.push(sample(filler[i % filler.len()]));
        }
        assert_eq!(window.digit_stats().least_frequent, 3);

        strategy.state = RarityState::Candidate {
            digit: 3,
            last_share: dec!(5),
            declines: 1,
        };
        let signal = strategy.evaluate(&window);
        assert_ne!(signal.tier, Tier::Ready);
        assert_eq!(strategy.state(), RarityState::Searching { excluded: None });
    }

    #[test]
    fn test_skips_global_extremes_and_common_digits() {
        let strategy = DiffersStrategy::new(StrategyId::Differs, params());
        let stats = seeded_window().digit_stats();
        // 0 is least frequent (absent) and out of range anyway; 1 most frequent
        assert_eq!(stats.least_frequent, 0);
        assert_eq!(stats.most_frequent, 1);
        assert_eq!(strategy.pick_candidate(&stats, None), Some(3));
        assert_eq!(strategy.pick_candidate(&stats, Some(3)), None);
    }

    #[test]
    fn test_needs_min_samples() {
        let mut strategy = DiffersStrategy::new(StrategyId::Differs, params());
        let mut window = TickWindow::new(40);
        window.push(sample(3));
        assert_eq!(strategy.evaluate(&window).decision, Decision::None);
    }
}
