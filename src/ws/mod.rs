//! Venue connection
//!
//! One multiplexed WebSocket carrying correlated requests and keyed push
//! subscriptions, with keep-alive, stale detection and bounded reconnection.

mod client;
mod registry;
mod subscriptions;
mod transport;
mod types;

pub use client::Connector;
pub(crate) use client::lock;
pub use registry::SubscriptionRegistry;
pub use subscriptions::{SubscriptionInfo, SubscriptionStatus, SubscriptionStream};
pub use transport::{Dialer, TungsteniteDialer, WsConnection};
pub use types::{Backoff, ConnectionEvent, ConnectionStatus, ConnectorConfig, ConnectorError};

#[cfg(test)]
pub(crate) use transport::testing;
