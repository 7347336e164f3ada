//! Trade-rate and profit limits

use super::types::StopReason;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling one-minute cap on opened trades
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    opened: VecDeque<Instant>,
}

impl RateLimiter {
    /// `limit` trades per minute; 0 disables the cap
    pub fn per_minute(limit: usize) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
            opened: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.opened.front() {
            if now.saturating_duration_since(*front) >= self.window {
                self.opened.pop_front();
            } else {
                break;
            }
        }
    }

    /// Trades opened within the window ending at `now`
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.opened.len()
    }

    pub fn is_limited(&mut self, now: Instant) -> bool {
        self.limit > 0 && self.count(now) >= self.limit
    }

    pub fn record(&mut self, now: Instant) {
        self.prune(now);
        self.opened.push_back(now);
    }

    /// Undo the latest record, for attempts that never opened
    pub fn forget_last(&mut self) {
        self.opened.pop_back();
    }
}

/// Cumulative-profit bounds, both inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitTargets {
    pub take_profit: Option<Decimal>,
    /// Positive magnitude of the tolerated loss
    pub stop_loss: Option<Decimal>,
}

impl ProfitTargets {
    pub fn check(&self, cumulative_profit: Decimal) -> Option<StopReason> {
        if matches!(self.take_profit, Some(tp) if cumulative_profit >= tp) {
            return Some(StopReason::TakeProfit);
        }
        if matches!(self.stop_loss, Some(sl) if cumulative_profit <= -sl) {
            return Some(StopReason::StopLoss);
        }
        None
    }
}
