//! Quote → purchase → monitor over the connector

use super::types::{
    Contract, ContractRequest, ExecutionError, PurchasedContract, Quote, Settlement,
};
use super::ExecutionEngine;
use crate::protocol::{self, body, keys, requests, BuyBody, OpenContractBody, ProposalBody};
use crate::telemetry::{self, LatencyMetric};
use crate::ws::{Connector, ConnectorError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::Instant;

fn positive(value: Option<Decimal>, field: &str) -> Result<Decimal, ExecutionError> {
    match value {
        Some(v) if v > Decimal::ZERO => Ok(v),
        Some(v) => Err(ExecutionError::Validation(format!("{field} must be positive, got {v}"))),
        None => Err(ExecutionError::Validation(format!("{field} missing"))),
    }
}

/// Executes contracts against the venue behind a [`Connector`]
#[derive(Clone)]
pub struct TradeExecutor {
    connector: Connector,
    request_timeout: Duration,
    monitor_timeout: Duration,
}

impl TradeExecutor {
    pub fn new(connector: Connector, request_timeout: Duration, monitor_timeout: Duration) -> Self {
        Self {
            connector,
            request_timeout,
            monitor_timeout,
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    async fn await_settlement(
        stream: &mut crate::ws::SubscriptionStream,
        contract_id: u64,
    ) -> Result<Settlement, ExecutionError> {
        while let Some(message) = stream.next().await {
            if let Some(error) = protocol::error_of(&message) {
                return Err(error.into());
            }
            let update: OpenContractBody = body(&message, "proposal_open_contract")?;
            if !update.is_settled() {
                tracing::debug!(contract_id, status = ?update.status, "Contract update");
                continue;
            }

            let profit = update.profit.ok_or_else(|| {
                ExecutionError::Validation("settled contract without profit".into())
            })?;
            let won = match update.status.as_deref() {
                Some("won") => true,
                Some("lost") => false,
                _ => profit > Decimal::ZERO,
            };
            return Ok(Settlement {
                contract_id,
                buy_price: update.buy_price.unwrap_or_default(),
                payout: if won {
                    update.payout.unwrap_or_default()
                } else {
                    Decimal::ZERO
                },
                profit,
                entry_spot: update.entry_tick,
                exit_spot: update.exit_tick,
                won,
            });
        }
        Err(ConnectorError::Transport("contract stream ended before settlement".into()).into())
    }
}

#[async_trait]
impl ExecutionEngine for TradeExecutor {
    fn monitor_timeout(&self) -> Duration {
        self.monitor_timeout
    }

    async fn request_quote(&self, request: &ContractRequest) -> Result<Quote, ExecutionError> {
        let response = self
            .connector
            .send_request(request.payload(), self.request_timeout)
            .await?;
        let proposal: ProposalBody = body(&response, "proposal")?;

        let id = proposal
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExecutionError::Validation("proposal id missing".into()))?;
        let quote = Quote {
            id,
            ask_price: positive(proposal.ask_price, "ask_price")?,
            payout: positive(proposal.payout, "payout")?,
            spot: proposal.spot,
            longcode: proposal.longcode,
        };
        tracing::debug!(
            quote_id = %quote.id,
            ask = %quote.ask_price,
            payout = %quote.payout,
            "Quote received"
        );
        Ok(quote)
    }

    async fn purchase(
        &self,
        quote_id: &str,
        ask_price: Decimal,
    ) -> Result<PurchasedContract, ExecutionError> {
        let response = self
            .connector
            .send_request(requests::buy(quote_id, ask_price), self.request_timeout)
            .await?;
        let buy: BuyBody = body(&response, "buy")?;

        let contract_id = match buy.contract_id {
            Some(id) if id > 0 => id,
            _ => return Err(ExecutionError::Validation("contract_id missing or zero".into())),
        };
        let purchased = PurchasedContract {
            contract_id,
            buy_price: positive(buy.buy_price, "buy_price")?,
            payout: buy.payout.unwrap_or_default(),
            transaction_id: buy.transaction_id,
            balance_after: buy.balance_after,
        };
        tracing::info!(
            contract_id,
            buy_price = %purchased.buy_price,
            payout = %purchased.payout,
            "Contract purchased"
        );
        Ok(purchased)
    }

    async fn monitor(
        &self,
        contract_id: u64,
        timeout: Duration,
    ) -> Result<Settlement, ExecutionError> {
        let key = keys::open_contract(contract_id);
        let started = Instant::now();
        let mut stream = self
            .connector
            .subscribe(&key, requests::proposal_open_contract(contract_id))
            .await?;

        let outcome = tokio::time::timeout(timeout, Self::await_settlement(&mut stream, contract_id))
            .await
            .unwrap_or(Err(ExecutionError::MonitorTimeout {
                contract_id,
                after: timeout,
            }));

        drop(stream);
        self.connector.unsubscribe(&key).await;

        match &outcome {
            Ok(settlement) => {
                telemetry::record_latency(LatencyMetric::Settlement, started.elapsed());
                tracing::info!(
                    contract_id,
                    won = settlement.won,
                    profit = %settlement.profit,
                    "Contract settled"
                );
            }
            Err(e) => tracing::warn!(contract_id, error = %e, "Contract monitor failed"),
        }
        outcome
    }
}
