//! Catalog backed by the venue connection

use super::{Catalog, MarketSymbol};
use crate::protocol::{self, requests, ActiveSymbol, ContractsForBody};
use crate::signal::ContractType;
use crate::ws::{Connector, ConnectorError};
use async_trait::async_trait;

/// Catalog answered by `active_symbols` / `contracts_for`
#[derive(Clone)]
pub struct VenueCatalog {
    connector: Connector,
}

impl VenueCatalog {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Catalog for VenueCatalog {
    async fn symbols(&self) -> Result<Vec<MarketSymbol>, ConnectorError> {
        let response = self.connector.request(requests::active_symbols()).await?;
        let listed: Vec<ActiveSymbol> = protocol::body(&response, "active_symbols")?;
        tracing::debug!(count = listed.len(), "Fetched active symbols");

        Ok(listed
            .into_iter()
            .map(|s| MarketSymbol {
                symbol: s.symbol,
                display_name: s.display_name,
                market: s.market,
                submarket: s.submarket,
                is_open: s.exchange_is_open.unwrap_or(1) == 1,
            })
            .collect())
    }

    async fn contract_types(&self, symbol: &str) -> Result<Vec<ContractType>, ConnectorError> {
        let response = self
            .connector
            .request(requests::contracts_for(symbol))
            .await?;
        let offered: ContractsForBody = protocol::body(&response, "contracts_for")?;

        let mut types: Vec<ContractType> = offered
            .available
            .iter()
            .filter_map(|offer| offer.contract_type.parse().ok())
            .collect();
        types.sort_by_key(|t| t.code());
        types.dedup();
        Ok(types)
    }
}
