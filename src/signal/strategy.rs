//! Strategy trait and presets

use super::bias::{BiasClasses, BiasStrategy};
use super::differs::DiffersStrategy;
use super::tiers::ThresholdTiers;
use super::types::{ContractType, Signal, StrategyId};
use super::window::TickWindow;
use crate::config::StrategyConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Turns the current window into a trading decision
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    fn evaluate(&mut self, window: &TickWindow) -> Signal;

    /// Contract types this strategy may emit
    fn contract_types(&self) -> Vec<ContractType>;

    /// Drop any state carried between evaluations
    fn reset(&mut self) {}
}

/// Tunables shared by the bias strategies
#[derive(Debug, Clone, PartialEq)]
pub struct BiasParams {
    pub tiers: ThresholdTiers,
    pub min_samples: usize,
    /// Window states that must show a non-decreasing dominant share
    pub trend_ticks: usize,
    pub max_entropy: Option<f64>,
}

impl BiasParams {
    pub fn preset(advanced: bool) -> Self {
        if advanced {
            Self {
                tiers: ThresholdTiers::new(dec!(55), dec!(58), dec!(62)),
                min_samples: 50,
                trend_ticks: 5,
                max_entropy: Some(3.25),
            }
        } else {
            Self {
                tiers: ThresholdTiers::new(dec!(52), dec!(55), dec!(58)),
                min_samples: 20,
                trend_ticks: 3,
                max_entropy: None,
            }
        }
    }
}

/// Tunables of the rarity strategy
#[derive(Debug, Clone, PartialEq)]
pub struct RarityParams {
    /// Inclusive digit range candidates are drawn from
    pub low: u8,
    pub high: u8,
    /// Share below which a digit counts as rare
    pub threshold: Decimal,
    /// Non-increasing observations needed before confirming
    pub decline_ticks: usize,
    /// Most recent samples the candidate must be absent from
    pub absence_ticks: usize,
    pub min_samples: usize,
    pub max_entropy: Option<f64>,
}

impl RarityParams {
    pub fn preset(advanced: bool) -> Self {
        if advanced {
            Self {
                low: 2,
                high: 7,
                threshold: dec!(6),
                decline_ticks: 5,
                absence_ticks: 8,
                min_samples: 50,
                max_entropy: Some(3.25),
            }
        } else {
            Self {
                low: 2,
                high: 7,
                threshold: dec!(8),
                decline_ticks: 3,
                absence_ticks: 5,
                min_samples: 30,
                max_entropy: None,
            }
        }
    }
}

/// Build the configured strategy, applying overrides to its preset
pub fn build_strategy(config: &StrategyConfig) -> Box<dyn Strategy> {
    let advanced = config.kind.is_advanced();
    match config.kind {
        StrategyId::EvenOdd | StrategyId::EvenOddAdvanced => Box::new(BiasStrategy::new(
            config.kind,
            BiasClasses::EvenOdd,
            bias_params(config, advanced),
        )),
        StrategyId::OverUnder | StrategyId::OverUnderAdvanced => Box::new(BiasStrategy::new(
            config.kind,
            BiasClasses::OverUnder {
                split: config.split,
            },
            bias_params(config, advanced),
        )),
        StrategyId::Differs | StrategyId::DiffersAdvanced => {
            let preset = RarityParams::preset(advanced);
            let params = RarityParams {
                low: config.differs_low,
                high: config.differs_high,
                threshold: config.rarity_threshold.unwrap_or(preset.threshold),
                decline_ticks: config.decline_ticks.unwrap_or(preset.decline_ticks),
                absence_ticks: config.absence_ticks.unwrap_or(preset.absence_ticks),
                min_samples: config.min_samples.unwrap_or(preset.min_samples),
                max_entropy: config.max_entropy.or(preset.max_entropy),
            };
            Box::new(DiffersStrategy::new(config.kind, params))
        }
    }
}

fn bias_params(config: &StrategyConfig, advanced: bool) -> BiasParams {
    let preset = BiasParams::preset(advanced);
    BiasParams {
        tiers: config.tiers.unwrap_or(preset.tiers),
        min_samples: config.min_samples.unwrap_or(preset.min_samples),
        trend_ticks: config.trend_ticks.unwrap_or(preset.trend_ticks),
        max_entropy: config.max_entropy.or(preset.max_entropy),
    }
}
