//! Typed response bodies
//!
//! Fields the engine depends on are optional here so that a missing value
//! surfaces as a validation error at the call site instead of a parse error.

use crate::ws::ConnectorError;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Deserialize `message[field]`
pub fn body<T: DeserializeOwned>(message: &Value, field: &str) -> Result<T, ConnectorError> {
    let value = message
        .get(field)
        .ok_or_else(|| ConnectorError::Validation(format!("response missing '{field}'")))?;
    T::deserialize(value)
        .map_err(|e| ConnectorError::Validation(format!("malformed '{field}': {e}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickBody {
    pub symbol: String,
    pub quote: Decimal,
    pub epoch: i64,
    #[serde(default)]
    pub pip_size: Option<u32>,
}

/// `history` of a `ticks_history` response; `pip_size` sits beside it
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryBody {
    pub prices: Vec<Decimal>,
    pub times: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposalBody {
    pub id: Option<String>,
    pub ask_price: Option<Decimal>,
    pub payout: Option<Decimal>,
    pub spot: Option<Decimal>,
    pub spot_time: Option<i64>,
    pub longcode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuyBody {
    pub contract_id: Option<u64>,
    pub buy_price: Option<Decimal>,
    pub payout: Option<Decimal>,
    pub transaction_id: Option<u64>,
    pub start_time: Option<i64>,
    pub balance_after: Option<Decimal>,
    pub longcode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenContractBody {
    pub contract_id: Option<u64>,
    #[serde(default)]
    pub is_sold: u8,
    pub status: Option<String>,
    pub profit: Option<Decimal>,
    pub payout: Option<Decimal>,
    pub buy_price: Option<Decimal>,
    pub entry_tick: Option<Decimal>,
    pub exit_tick: Option<Decimal>,
    pub sell_time: Option<i64>,
}

impl OpenContractBody {
    /// Sold, or carrying a final won/lost status
    pub fn is_settled(&self) -> bool {
        self.is_sold != 0 || matches!(self.status.as_deref(), Some("won" | "lost"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceBody {
    pub balance: Decimal,
    pub currency: String,
    #[serde(default)]
    pub loginid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeBody {
    pub loginid: String,
    pub currency: String,
    pub balance: Decimal,
    #[serde(default)]
    pub is_virtual: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveSymbol {
    pub symbol: String,
    pub display_name: String,
    pub market: String,
    #[serde(default)]
    pub submarket: Option<String>,
    #[serde(default)]
    pub exchange_is_open: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsForBody {
    #[serde(default)]
    pub available: Vec<ContractOffer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractOffer {
    pub contract_type: String,
    #[serde(default)]
    pub contract_category: Option<String>,
    #[serde(default)]
    pub min_contract_duration: Option<String>,
    #[serde(default)]
    pub max_contract_duration: Option<String>,
}
