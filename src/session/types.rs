//! Session state, records and events

use crate::execution::{Contract, ExecutionError, Settlement};
use crate::risk::{RiskState, StopReason};
use crate::signal::{ContractType, Signal, StrategyId, TickSample};
use crate::ws::ConnectorError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Analyzing,
    Trading,
    Stopped(StopReason),
}

impl SessionState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped(_))
    }
}

/// Counters kept by the loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Ticks folded into the window, warmup excluded
    pub ticks: u64,
    /// Enter signals raised
    pub signals: u64,
    /// Attempts that reached settlement
    pub trades: u64,
    /// Cycles skipped by rate limiting or a recoverable error
    pub skipped_cycles: u64,
    /// Ticks not evaluated because an attempt was in flight
    pub skipped_overlap: u64,
    /// Attempts dropped on the latency budget
    pub abandoned: u64,
    /// Purchased contracts whose settlement was never observed
    pub unsettled: u64,
    /// Tick subscriptions re-opened after a connection loss
    pub resubscriptions: u64,
}

/// One settled trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub strategy: StrategyId,
    pub symbol: String,
    pub contract_id: u64,
    pub contract_type: ContractType,
    pub barrier: Option<u8>,
    pub stake: Decimal,
    pub payout: Decimal,
    pub profit: Decimal,
    pub won: bool,
    pub entry_spot: Option<Decimal>,
    pub exit_spot: Option<Decimal>,
    /// Martingale level the stake was sized at
    pub martingale_level: u32,
    pub opened_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(
        strategy: StrategyId,
        contract: &Contract,
        settlement: &Settlement,
        martingale_level: u32,
    ) -> Self {
        let settled_at = contract.settled_at.unwrap_or_else(Utc::now);
        Self {
            id: Uuid::new_v4(),
            strategy,
            symbol: contract.request.symbol.clone(),
            contract_id: settlement.contract_id,
            contract_type: contract.request.contract_type,
            barrier: contract.request.barrier,
            stake: contract.stake(),
            payout: settlement.payout,
            profit: settlement.profit,
            won: settlement.won,
            entry_spot: settlement.entry_spot,
            exit_spot: settlement.exit_spot,
            martingale_level,
            opened_at: contract.opened_at.unwrap_or(settled_at),
            settled_at,
        }
    }
}

/// Everything a presentation layer needs to render the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub symbol: String,
    pub strategy: StrategyId,
    pub state: SessionState,
    pub risk: RiskState,
    pub stats: SessionStats,
    pub last_signal: Option<Signal>,
    pub latest_tick: Option<TickSample>,
    pub window_len: usize,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            SessionState::Stopped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Published after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    SignalRaised { signal: Signal },
    TradeSettled { trade: TradeRecord },
    TradeFailed { reason: String },
    Stopped { reason: StopReason },
}

/// Final account of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub stop_reason: StopReason,
    pub risk: RiskState,
    pub stats: SessionStats,
    pub trades: Vec<TradeRecord>,
}

/// Failures that prevent a session from starting
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("Preflight failed: {0}")]
    Preflight(String),
}

/// Result of one trade attempt, reported back to the loop
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Settled {
        contract: Contract,
        settlement: Settlement,
    },
    /// Quote or purchase failed; nothing was bought
    NotOpened(ExecutionError),
    /// Quote + purchase overran the latency budget
    Abandoned,
    /// Bought but the settlement was never observed
    Unsettled {
        contract: Contract,
        error: ExecutionError,
    },
}
