//! Tracks which subscriptions a component owns so they can be released together

use super::client::{lock, Connector};
use super::subscriptions::SubscriptionStream;
use super::types::ConnectorError;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Owner-side bookkeeping over the connector's keyed subscriptions
pub struct SubscriptionRegistry {
    connector: Connector,
    owned: Mutex<BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector,
            owned: Mutex::new(BTreeSet::new()),
        }
    }

    /// Subscribe to `key` and remember it as owned
    pub async fn ensure(
        &self,
        key: &str,
        payload: Value,
    ) -> Result<SubscriptionStream, ConnectorError> {
        let stream = self.connector.subscribe(key, payload).await?;
        if stream.provider_id().is_some() {
            lock(&self.owned).insert(key.to_string());
        }
        Ok(stream)
    }

    /// Release one owned key; unknown keys are a no-op
    pub async fn release(&self, key: &str) -> bool {
        if !lock(&self.owned).remove(key) {
            return false;
        }
        self.connector.unsubscribe(key).await
    }

    /// Release everything this owner holds
    pub async fn release_all(&self) -> usize {
        let keys: Vec<String> = std::mem::take(&mut *lock(&self.owned))
            .into_iter()
            .collect();
        for key in &keys {
            self.connector.unsubscribe(key).await;
        }
        if !keys.is_empty() {
            tracing::info!(released = keys.len(), "Released owned subscriptions");
        }
        keys.len()
    }

    pub fn owned_keys(&self) -> Vec<String> {
        lock(&self.owned).iter().cloned().collect()
    }

    /// Forget ownership without contacting the venue, after the link dropped them
    pub fn clear(&self) {
        lock(&self.owned).clear();
    }
}
