//! Venue wire protocol
//!
//! JSON frames over one WebSocket. Requests carry `req_id`, echoed in the
//! response; pushes carry `subscription.id`; failures carry an
//! `error: {code, message}` object.

pub mod requests;
pub mod responses;

pub use responses::{
    body, ActiveSymbol, AuthorizeBody, BalanceBody, BuyBody, ContractOffer, ContractsForBody,
    HistoryBody, OpenContractBody, ProposalBody, TickBody,
};

use crate::ws::ConnectorError;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// Request kinds recognised when labelling traffic
const REQUEST_KINDS: &[&str] = &[
    "authorize",
    "ping",
    "balance",
    "ticks",
    "ticks_history",
    "active_symbols",
    "contracts_for",
    "proposal",
    "buy",
    "proposal_open_contract",
    "forget",
    "forget_all",
];

/// Message kind of an outgoing request, for logs and metrics
pub fn request_kind(body: &Map<String, Value>) -> &'static str {
    REQUEST_KINDS
        .iter()
        .find(|kind| body.contains_key(**kind))
        .copied()
        .unwrap_or("other")
}

/// Error carried by a response, if any
pub fn error_of(message: &Value) -> Option<ConnectorError> {
    let error = message.get("error")?;
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("UnknownError")
        .to_string();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(ConnectorError::Protocol { code, message })
}

/// Provider-assigned stream id of a push or opening response
pub fn subscription_id(message: &Value) -> Option<String> {
    message
        .get("subscription")?
        .get("id")?
        .as_str()
        .map(str::to_string)
}

pub fn msg_type(message: &Value) -> Option<&str> {
    message.get("msg_type").and_then(Value::as_str)
}

/// Logical subscription keys
pub mod keys {
    pub const BALANCE: &str = "balance";

    pub fn ticks(symbol: &str) -> String {
        format!("ticks:{symbol}")
    }

    pub fn open_contract(contract_id: u64) -> String {
        format!("proposal_open_contract:{contract_id}")
    }

    /// Stream kind a key belongs to (`ticks:R_100` → `ticks`)
    pub fn kind_of(key: &str) -> &str {
        key.split(':').next().unwrap_or(key)
    }
}

/// Account details returned by `authorize`
#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    pub login_id: String,
    pub currency: String,
    pub balance: Decimal,
    pub is_virtual: bool,
}

impl AccountInfo {
    pub fn from_response(response: &Value) -> Result<Self, ConnectorError> {
        let body: AuthorizeBody = body(response, "authorize")?;
        Ok(Self {
            login_id: body.loginid,
            currency: body.currency,
            balance: body.balance,
            is_virtual: body.is_virtual.unwrap_or(0) != 0,
        })
    }
}
