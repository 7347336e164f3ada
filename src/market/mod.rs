//! Market catalog
//!
//! Which symbols the venue lists and which digit contracts each one offers.

mod catalog;

pub use catalog::VenueCatalog;

use crate::signal::ContractType;
use crate::ws::ConnectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tradable underlying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSymbol {
    pub symbol: String,
    pub display_name: String,
    pub market: String,
    pub submarket: Option<String>,
    pub is_open: bool,
}

/// Source of tradable symbols and contract types
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Symbols currently listed
    async fn symbols(&self) -> Result<Vec<MarketSymbol>, ConnectorError>;

    /// Digit contract types offered on `symbol`; unknown venue types are skipped
    async fn contract_types(&self, symbol: &str) -> Result<Vec<ContractType>, ConnectorError>;
}
