//! Signal generation
//!
//! Bounded tick windows, digit statistics and the strategies that turn them
//! into trading decisions.

mod bias;
mod differs;
mod strategy;
mod tick;
mod tiers;
mod types;
mod window;

pub use bias::{BiasClasses, BiasStrategy};
pub use differs::{DiffersStrategy, RarityState};
pub use strategy::{build_strategy, BiasParams, RarityParams, Strategy};
pub use tick::{last_digit, TickSample, DEFAULT_PIP_SIZE};
pub use tiers::ThresholdTiers;
pub use types::{ContractType, Decision, Signal, StrategyId, Tier};
pub use window::{DigitStats, TickWindow};
