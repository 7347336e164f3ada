//! Execution types

use crate::protocol::requests;
use crate::signal::{ContractType, Signal};
use crate::ws::ConnectorError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// A contract the session wants priced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRequest {
    pub symbol: String,
    pub contract_type: ContractType,
    pub barrier: Option<u8>,
    pub stake: Decimal,
    pub currency: String,
    pub duration_ticks: u32,
}

impl ContractRequest {
    /// Request for an Enter signal; `None` for any other decision
    pub fn from_signal(
        signal: &Signal,
        symbol: &str,
        stake: Decimal,
        currency: &str,
        duration_ticks: u32,
    ) -> Option<Self> {
        if !signal.is_enter() {
            return None;
        }
        Some(Self {
            symbol: symbol.to_string(),
            contract_type: signal.contract_type?,
            barrier: signal.barrier,
            stake,
            currency: currency.to_string(),
            duration_ticks,
        })
    }

    /// `proposal` request payload
    pub fn payload(&self) -> Value {
        requests::proposal(
            &self.symbol,
            self.contract_type.code(),
            self.barrier,
            self.stake,
            &self.currency,
            self.duration_ticks,
        )
    }
}

/// A priced offer, valid briefly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub id: String,
    pub ask_price: Decimal,
    pub payout: Decimal,
    pub spot: Option<Decimal>,
    pub longcode: Option<String>,
}

/// A bought contract
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchasedContract {
    pub contract_id: u64,
    pub buy_price: Decimal,
    pub payout: Decimal,
    pub transaction_id: Option<u64>,
    pub balance_after: Option<Decimal>,
}

/// Final outcome of a contract
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub contract_id: u64,
    pub buy_price: Decimal,
    /// Amount paid out; zero on a loss
    pub payout: Decimal,
    /// Net of the buy price
    pub profit: Decimal,
    pub entry_spot: Option<Decimal>,
    pub exit_spot: Option<Decimal>,
    pub won: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pending,
    Open,
    Settled,
}

/// One contract through its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub id: Option<u64>,
    pub request: ContractRequest,
    pub status: ContractStatus,
    pub buy_price: Option<Decimal>,
    pub payout: Option<Decimal>,
    pub profit: Option<Decimal>,
    pub entry_spot: Option<Decimal>,
    pub exit_spot: Option<Decimal>,
    pub opened_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Contract {
    pub fn pending(request: ContractRequest) -> Self {
        Self {
            id: None,
            request,
            status: ContractStatus::Pending,
            buy_price: None,
            payout: None,
            profit: None,
            entry_spot: None,
            exit_spot: None,
            opened_at: None,
            settled_at: None,
        }
    }

    pub fn open(&mut self, purchase: &PurchasedContract) {
        self.id = Some(purchase.contract_id);
        self.buy_price = Some(purchase.buy_price);
        self.payout = Some(purchase.payout);
        self.status = ContractStatus::Open;
        self.opened_at = Some(Utc::now());
    }

    pub fn settle(&mut self, settlement: &Settlement) {
        self.payout = Some(settlement.payout);
        self.profit = Some(settlement.profit);
        self.entry_spot = settlement.entry_spot;
        self.exit_spot = settlement.exit_spot;
        self.status = ContractStatus::Settled;
        self.settled_at = Some(Utc::now());
    }

    /// Stake actually paid, falling back to the requested one
    pub fn stake(&self) -> Decimal {
        self.buy_price.unwrap_or(self.request.stake)
    }
}

/// Trade execution errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error(transparent)]
    Connector(ConnectorError),
    /// Response fields missing, non-numeric or out of range
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Contract {contract_id} not settled within {after:?}")]
    MonitorTimeout { contract_id: u64, after: Duration },
}

impl ExecutionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Connector(e) if e.is_fatal())
    }
}

impl From<ConnectorError> for ExecutionError {
    fn from(error: ConnectorError) -> Self {
        match error {
            ConnectorError::Validation(message) => ExecutionError::Validation(message),
            other => ExecutionError::Connector(other),
        }
    }
}
