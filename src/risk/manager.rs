//! Per-session risk manager

use super::limits::{ProfitTargets, RateLimiter};
use super::martingale::MartingaleSizer;
use super::types::{RiskError, RiskState, StopReason};
use crate::config::RiskConfig;
use rust_decimal::Decimal;
use tokio::time::Instant;

/// Gates trade attempts and sizes stakes for one session
///
/// Exclusively owned by its session loop; never shared.
#[derive(Debug)]
pub struct RiskManager {
    sizer: MartingaleSizer,
    targets: ProfitTargets,
    limiter: RateLimiter,
    state: RiskState,
    /// Once the venue reports a balance, settlements stop adjusting it locally
    venue_balance: bool,
}

impl RiskManager {
    pub fn new(config: &RiskConfig) -> Self {
        Self::with_balance(config, config.initial_balance)
    }

    pub fn with_balance(config: &RiskConfig, balance: Decimal) -> Self {
        Self {
            sizer: MartingaleSizer {
                base_stake: config.base_stake,
                multiplier: config.martingale_multiplier,
                max_level: config.max_martingale_level,
                max_stake_fraction: config.max_stake_fraction,
                min_stake: config.min_stake,
            },
            targets: ProfitTargets {
                take_profit: config.take_profit,
                stop_loss: config.stop_loss,
            },
            limiter: RateLimiter::per_minute(config.max_trades_per_minute),
            state: RiskState::new(balance, config.base_stake),
            venue_balance: false,
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// State with the rolling trade count refreshed
    pub fn snapshot(&mut self, now: Instant) -> RiskState {
        self.state.trades_this_minute = self.limiter.count(now);
        self.state.clone()
    }

    /// Terminal condition, if one holds
    pub fn stop_reason(&self) -> Option<StopReason> {
        if let Some(reason) = self.targets.check(self.state.cumulative_profit) {
            return Some(reason);
        }
        if self.state.balance <= Decimal::ZERO {
            return Some(StopReason::BalanceExhausted);
        }
        None
    }

    pub fn check_can_open(&mut self, now: Instant) -> Result<(), RiskError> {
        if self.state.open_trades > 0 {
            return Err(RiskError::TradeAlreadyOpen);
        }
        match self.stop_reason() {
            Some(StopReason::BalanceExhausted) => return Err(RiskError::BalanceExhausted),
            Some(reason) => return Err(RiskError::RiskLimitReached(reason)),
            None => {}
        }
        if self.limiter.is_limited(now) {
            return Err(RiskError::RateLimitExceeded {
                count: self.limiter.count(now),
                limit: self.limiter.limit(),
            });
        }
        Ok(())
    }

    pub fn can_open_trade(&mut self, now: Instant) -> bool {
        self.check_can_open(now).is_ok()
    }

    /// Stake for martingale `level` at the current balance
    pub fn stake_for_attempt(&self, level: u32) -> Result<Decimal, RiskError> {
        self.sizer.stake(level, self.state.balance)
    }

    /// Stake for the current martingale level
    pub fn next_stake(&self) -> Result<Decimal, RiskError> {
        self.stake_for_attempt(self.state.martingale_level)
    }

    /// Reserve the slot for an attempt about to be placed
    pub fn trade_opened(&mut self, stake: Decimal, now: Instant) {
        self.state.open_trades += 1;
        self.state.current_stake = stake;
        self.limiter.record(now);
    }

    /// Release a reserved slot whose purchase never happened
    pub fn trade_aborted(&mut self) {
        self.state.open_trades = self.state.open_trades.saturating_sub(1);
        self.limiter.forget_last();
    }

    /// Fold a settled trade into the state; returns a stop reason if one now holds
    pub fn record_result(&mut self, stake: Decimal, profit: Decimal) -> Option<StopReason> {
        let state = &mut self.state;
        state.open_trades = state.open_trades.saturating_sub(1);
        state.total_staked += stake;
        state.cumulative_profit += profit;
        if !self.venue_balance {
            state.balance += profit;
        }

        if profit < Decimal::ZERO {
            state.losses += 1;
            state.consecutive_losses += 1;
            state.martingale_level = (state.martingale_level + 1).min(self.sizer.max_level);
        } else if profit > Decimal::ZERO {
            state.wins += 1;
            state.consecutive_losses = 0;
            state.martingale_level = 0;
        }

        let level = state.martingale_level;
        state.current_stake = self
            .sizer
            .stake(level, state.balance)
            .unwrap_or_else(|_| self.sizer.raw_stake(level));

        tracing::debug!(
            %stake,
            %profit,
            cumulative = %self.state.cumulative_profit,
            level = self.state.martingale_level,
            "Trade result recorded"
        );
        self.stop_reason()
    }

    /// Adopt the venue-reported balance
    pub fn sync_balance(&mut self, balance: Decimal) {
        self.venue_balance = true;
        self.state.balance = balance;
    }
}
