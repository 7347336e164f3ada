//! Keyed push subscriptions on top of the connector
//!
//! A subscription is identified by a caller-chosen logical key such as
//! `ticks:R_100`. The venue assigns its own id on the opening response; pushes
//! carrying that id fan out to every listener of the key.

use super::client::{lock, Connector};
use super::types::ConnectorError;
use crate::protocol::{self, requests};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle of one logical subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Opening,
    Active,
    Released,
}

pub(super) struct SubscriptionEntry {
    provider_id: Option<String>,
    listeners: Vec<mpsc::UnboundedSender<Value>>,
    status: SubscriptionStatus,
}

/// Entries by logical key plus the provider id routing table
#[derive(Default)]
pub(super) struct SubscriptionTable {
    entries: HashMap<String, SubscriptionEntry>,
    routes: HashMap<String, String>,
}

impl SubscriptionTable {
    fn remove(&mut self, key: &str) -> Option<SubscriptionEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(id) = &entry.provider_id {
            self.routes.remove(id);
        }
        Some(entry)
    }
}

/// Snapshot of one logical subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub key: String,
    pub provider_id: Option<String>,
    pub listeners: usize,
    pub status: SubscriptionStatus,
}

/// Receiving end of a subscription
///
/// The first message is the opening response. The stream ends when the
/// subscription is released or the connection drops.
#[derive(Debug)]
pub struct SubscriptionStream {
    key: String,
    provider_id: Option<String>,
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl SubscriptionStream {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Venue-assigned stream id, absent for snapshot-only responses
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    pub async fn next(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    /// Next buffered message without waiting
    pub fn try_next(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }
}

/// Drops a half-open entry and its flight if the subscribe future ends early
struct OpeningGuard<'a> {
    connector: &'a Connector,
    key: &'a str,
    flight: &'a Arc<tokio::sync::Mutex<()>>,
    armed: bool,
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connector.abort_opening(self.key);
            self.connector.release_flight(self.key, self.flight);
        }
    }
}

fn with_subscribe_flag(payload: Value) -> Result<Value, ConnectorError> {
    match payload {
        Value::Object(mut body) => {
            body.insert("subscribe".to_string(), Value::from(1));
            Ok(Value::Object(body))
        }
        _ => Err(ConnectorError::Validation(
            "subscription payload must be a JSON object".into(),
        )),
    }
}

impl Connector {
    /// Open or join the subscription for `key`
    ///
    /// `payload` is the opening request; `subscribe: 1` is added. Calls for
    /// the same key are single-flight: a second caller waits for the first
    /// and then joins the active subscription without another request.
    pub async fn subscribe(
        &self,
        key: &str,
        payload: Value,
    ) -> Result<SubscriptionStream, ConnectorError> {
        self.subscribe_with_timeout(key, payload, self.request_timeout())
            .await
    }

    pub async fn subscribe_with_timeout(
        &self,
        key: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<SubscriptionStream, ConnectorError> {
        let payload = with_subscribe_flag(payload)?;
        let flight = self.flight(key);
        let _flight = flight.lock().await;

        let (listener, receiver) = mpsc::unbounded_channel();
        {
            let mut table = lock(&self.shared.subscriptions);
            if let Some(entry) = table.entries.get_mut(key) {
                if entry.status == SubscriptionStatus::Active {
                    entry.listeners.retain(|l| !l.is_closed());
                    entry.listeners.push(listener);
                    tracing::debug!(key, "Joined active subscription");
                    return Ok(SubscriptionStream {
                        key: key.to_string(),
                        provider_id: entry.provider_id.clone(),
                        receiver,
                    });
                }
            }
            table.entries.insert(
                key.to_string(),
                SubscriptionEntry {
                    provider_id: None,
                    listeners: vec![listener],
                    status: SubscriptionStatus::Opening,
                },
            );
        }

        let mut guard = OpeningGuard {
            connector: self,
            key,
            flight: &flight,
            armed: true,
        };
        let response = self.transmit(payload, timeout, Some(key.to_string())).await?;
        guard.armed = false;

        let provider_id = protocol::subscription_id(&response);
        match &provider_id {
            Some(id) => tracing::info!(key, provider_id = %id, "Subscribed"),
            None => {
                tracing::debug!(key, "Subscription answered with a single snapshot");
                self.release_flight(key, &flight);
            }
        }

        Ok(SubscriptionStream {
            key: key.to_string(),
            provider_id,
            receiver,
        })
    }

    /// Release the subscription for `key`
    ///
    /// Sends a best-effort `forget`; the local entry is removed even when the
    /// venue does not acknowledge. Returns whether the venue acknowledged.
    pub async fn unsubscribe(&self, key: &str) -> bool {
        let flight = self.flight(key);
        let _flight = flight.lock().await;

        let provider_id = lock(&self.shared.subscriptions)
            .entries
            .get(key)
            .and_then(|entry| entry.provider_id.clone());

        let acknowledged = match &provider_id {
            Some(id) => match self.request(requests::forget(id)).await {
                Ok(response) => response.get("forget").and_then(Value::as_u64) == Some(1),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Forget failed, releasing locally");
                    false
                }
            },
            None => false,
        };

        if let Some(mut entry) = lock(&self.shared.subscriptions).remove(key) {
            entry.status = SubscriptionStatus::Released;
            tracing::debug!(key, listeners = entry.listeners.len(), "Subscription released");
        }
        self.release_flight(key, &flight);
        acknowledged
    }

    /// Forget every subscription of the given message kinds
    ///
    /// Matching local entries are removed regardless of the venue's answer.
    pub async fn forget_all(&self, kinds: &[&str]) -> Result<usize, ConnectorError> {
        let outcome = self.request(requests::forget_all(kinds)).await;

        let removed = {
            let mut table = lock(&self.shared.subscriptions);
            let keys: Vec<String> = table
                .entries
                .keys()
                .filter(|key| kinds.contains(&protocol::keys::kind_of(key)))
                .cloned()
                .collect();
            for key in &keys {
                table.remove(key);
            }
            keys.len()
        };

        tracing::info!(?kinds, removed, "Forgot subscriptions");
        outcome.map(|_| removed)
    }

    /// Snapshot of all known subscriptions
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let table = lock(&self.shared.subscriptions);
        let mut infos: Vec<SubscriptionInfo> = table
            .entries
            .iter()
            .map(|(key, entry)| SubscriptionInfo {
                key: key.clone(),
                provider_id: entry.provider_id.clone(),
                listeners: entry.listeners.iter().filter(|l| !l.is_closed()).count(),
                status: entry.status,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.shared.subscriptions)
            .entries
            .values()
            .filter(|entry| entry.status == SubscriptionStatus::Active)
            .count()
    }

    fn flight(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.shared.flights)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn release_flight(&self, key: &str, flight: &Arc<tokio::sync::Mutex<()>>) {
        let mut flights = lock(&self.shared.flights);
        // Only the map and the caller hold it: nobody is queued behind
        if Arc::strong_count(flight) == 2 {
            flights.remove(key);
        }
    }

    /// Resolve an opening request; called by dispatch before the requester wakes
    pub(super) fn complete_opening(&self, key: &str, outcome: &Result<Value, ConnectorError>) {
        let mut table = lock(&self.shared.subscriptions);
        let Some(entry) = table.entries.get_mut(key) else {
            return;
        };
        if entry.status != SubscriptionStatus::Opening {
            return;
        }

        match outcome {
            Ok(response) => {
                entry.listeners.retain(|l| l.send(response.clone()).is_ok());
                match protocol::subscription_id(response) {
                    Some(id) => {
                        entry.provider_id = Some(id.clone());
                        entry.status = SubscriptionStatus::Active;
                        table.routes.insert(id, key.to_string());
                    }
                    None => {
                        table.entries.remove(key);
                    }
                }
            }
            Err(_) => {
                table.entries.remove(key);
            }
        }
    }

    pub(super) fn abort_opening(&self, key: &str) {
        let mut table = lock(&self.shared.subscriptions);
        let opening = table
            .entries
            .get(key)
            .is_some_and(|entry| entry.status == SubscriptionStatus::Opening);
        if opening {
            table.remove(key);
        }
    }

    /// Deliver a push to its listeners; false when nobody owns the id
    pub(super) fn route_push(&self, provider_id: &str, message: Value) -> bool {
        let mut table = lock(&self.shared.subscriptions);
        let Some(key) = table.routes.get(provider_id).cloned() else {
            return false;
        };
        match table.entries.get_mut(&key) {
            Some(entry) => {
                entry.listeners.retain(|l| l.send(message.clone()).is_ok());
                true
            }
            None => false,
        }
    }

    /// Drop every entry; listeners see their streams end
    pub(super) fn clear_subscriptions(&self) -> usize {
        let mut table = lock(&self.shared.subscriptions);
        let count = table.entries.len();
        table.entries.clear();
        table.routes.clear();
        count
    }
}
