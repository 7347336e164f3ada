//! Trade execution
//!
//! Drives the quote → purchase → monitor lifecycle of one contract, against
//! the live venue or the in-process paper venue.

mod executor;
mod paper;
mod types;

pub use executor::TradeExecutor;
pub use paper::PaperVenue;
pub use types::{
    Contract, ContractRequest, ContractStatus, ExecutionError, PurchasedContract, Quote, Settlement,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

/// Contract execution against a venue
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Deadline applied to settlement waits by [`execute_trade`](Self::execute_trade)
    fn monitor_timeout(&self) -> Duration;

    /// Price a contract
    async fn request_quote(&self, request: &ContractRequest) -> Result<Quote, ExecutionError>;

    /// Buy a quoted contract
    async fn purchase(
        &self,
        quote_id: &str,
        ask_price: Decimal,
    ) -> Result<PurchasedContract, ExecutionError>;

    /// Wait for a contract to settle; the contract's subscription is always released
    async fn monitor(&self, contract_id: u64, timeout: Duration)
        -> Result<Settlement, ExecutionError>;

    /// Quote and purchase
    async fn open_contract(&self, request: &ContractRequest) -> Result<Contract, ExecutionError> {
        let quote = self.request_quote(request).await?;
        let purchased = self.purchase(&quote.id, quote.ask_price).await?;
        let mut contract = Contract::pending(request.clone());
        contract.open(&purchased);
        Ok(contract)
    }

    /// Quote, purchase and wait for settlement
    async fn execute_trade(&self, request: &ContractRequest) -> Result<Settlement, ExecutionError> {
        let contract = self.open_contract(request).await?;
        let contract_id = contract
            .id
            .ok_or_else(|| ExecutionError::Validation("opened contract has no id".into()))?;
        self.monitor(contract_id, self.monitor_timeout()).await
    }
}
