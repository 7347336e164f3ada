//! Risk management types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    TakeProfit,
    StopLoss,
    BalanceExhausted,
    FatalConnection,
    Manual,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::TakeProfit => "take-profit",
            StopReason::StopLoss => "stop-loss",
            StopReason::BalanceExhausted => "balance-exhausted",
            StopReason::FatalConnection => "fatal-connection",
            StopReason::Manual => "manual",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk management errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    /// A contract is already open for this session
    #[error("Trade already open")]
    TradeAlreadyOpen,
    /// Take-profit or stop-loss bound reached
    #[error("Risk limit reached: {0}")]
    RiskLimitReached(StopReason),
    #[error("Balance exhausted")]
    BalanceExhausted,
    /// Per-minute trade cap reached
    #[error("Rate limit exceeded: {count} trades in the last minute (limit {limit})")]
    RateLimitExceeded { count: usize, limit: usize },
    /// No stake above the venue minimum fits under the balance cap
    #[error("No valid stake: wanted {wanted}, cap {cap}")]
    StakeUnavailable { wanted: Decimal, cap: Decimal },
}

impl RiskError {
    /// Terminal for the session, as opposed to skipping one cycle
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            RiskError::RiskLimitReached(reason) => Some(*reason),
            RiskError::BalanceExhausted => Some(StopReason::BalanceExhausted),
            _ => None,
        }
    }
}

/// Risk bookkeeping owned by one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskState {
    pub balance: Decimal,
    /// Stake the next attempt will use
    pub current_stake: Decimal,
    pub consecutive_losses: u32,
    pub martingale_level: u32,
    pub cumulative_profit: Decimal,
    pub open_trades: usize,
    pub trades_this_minute: usize,
    pub wins: u32,
    pub losses: u32,
    pub total_staked: Decimal,
}

impl RiskState {
    pub fn new(balance: Decimal, base_stake: Decimal) -> Self {
        Self {
            balance,
            current_stake: base_stake,
            consecutive_losses: 0,
            martingale_level: 0,
            cumulative_profit: Decimal::ZERO,
            open_trades: 0,
            trades_this_minute: 0,
            wins: 0,
            losses: 0,
            total_staked: Decimal::ZERO,
        }
    }

    pub fn trades(&self) -> u32 {
        self.wins + self.losses
    }

    /// Percent of decided trades won
    pub fn win_rate(&self) -> Decimal {
        match self.trades() {
            0 => Decimal::ZERO,
            n => (Decimal::from(self.wins) * Decimal::ONE_HUNDRED / Decimal::from(n)).round_dp(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stop_reason_labels() {
        assert_eq!(StopReason::TakeProfit.to_string(), "take-profit");
        assert_eq!(
            serde_json::to_value(StopReason::FatalConnection).unwrap(),
            serde_json::json!("fatal-connection")
        );
        assert_eq!(
            RiskError::RiskLimitReached(StopReason::StopLoss).stop_reason(),
            Some(StopReason::StopLoss)
        );
        assert!(RiskError::TradeAlreadyOpen.stop_reason().is_none());
    }

    #[test]
    fn test_win_rate() {
        let mut state = RiskState::new(dec!(100), dec!(1));
        assert_eq!(state.win_rate(), dec!(0));
        state.wins = 2;
        state.losses = 1;
        assert_eq!(state.win_rate(), dec!(66.67));
    }
}
