//! Risk management
//!
//! Martingale stake sizing, take-profit/stop-loss gating and trade-rate limits

mod limits;
mod manager;
mod martingale;
mod types;

pub use limits::{ProfitTargets, RateLimiter};
pub use manager::RiskManager;
pub use martingale::MartingaleSizer;
pub use types::{RiskError, RiskState, StopReason};
