//! Multiplexed connector over a single socket
//!
//! One supervisor task per connection owns inbound dispatch, keep-alive pings
//! and the stale-connection check, and redials when the socket drops. Requests are correlated by `req_id`; pushes are
//! routed by subscription id. On an unexpected close every pending request is
//! rejected and a bounded, jittered reconnect loop takes over.

use super::subscriptions::SubscriptionTable;
use super::transport::{Dialer, TungsteniteDialer, WsConnection};
use super::types::{ConnectionEvent, ConnectionStatus, ConnectorConfig, ConnectorError};
use crate::protocol::{self, requests, AccountInfo};
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request awaiting its response
pub(super) struct PendingRequest {
    resolver: oneshot::Sender<Result<Value, ConnectorError>>,
    kind: &'static str,
    sent_at: Instant,
    /// Subscription key this request opens, if any
    opens: Option<String>,
}

struct Link {
    status: ConnectionStatus,
    outbound: Option<mpsc::UnboundedSender<String>>,
    close: Option<oneshot::Sender<()>>,
    generation: u64,
}

pub(super) struct Shared {
    pub(super) config: ConnectorConfig,
    dialer: Arc<dyn Dialer>,
    next_req_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    link: Mutex<Link>,
    /// Serializes connect attempts so concurrent callers share one
    connect_gate: tokio::sync::Mutex<()>,
    pub(super) subscriptions: Mutex<SubscriptionTable>,
    /// Per-key single-flight locks for subscribe/unsubscribe
    pub(super) flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<ConnectionEvent>,
    last_inbound: Mutex<Instant>,
    account: Mutex<Option<AccountInfo>>,
}

/// Handle to one venue connection
///
/// Cheap to clone; every clone drives the same socket.
#[derive(Clone)]
pub struct Connector {
    pub(super) shared: Arc<Shared>,
}

/// A dialed socket not yet driven
struct OpenLink {
    generation: u64,
    inbound: mpsc::UnboundedReceiver<String>,
    close: oneshot::Receiver<()>,
}

/// Why a link stopped
enum LinkEnd {
    Requested,
    Closed,
    Stale(Duration),
}

impl LinkEnd {
    fn describe(&self) -> String {
        match self {
            LinkEnd::Requested => "connection closed by client".to_string(),
            LinkEnd::Closed => "socket closed".to_string(),
            LinkEnd::Stale(silence) => format!("no inbound traffic for {silence:?}"),
        }
    }
}

/// Removes a request from the pending map however its future ends
struct Registration<'a> {
    shared: &'a Shared,
    req_id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.req_id);
    }
}

impl Connector {
    /// Create a connector that dials over tokio-tungstenite
    pub fn new(config: ConnectorConfig) -> Self {
        Self::with_dialer(config, Arc::new(TungsteniteDialer))
    }

    /// Create a connector over a custom transport
    pub fn with_dialer(config: ConnectorConfig, dialer: Arc<dyn Dialer>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                config,
                dialer,
                next_req_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                link: Mutex::new(Link {
                    status: ConnectionStatus::Disconnected,
                    outbound: None,
                    close: None,
                    generation: 0,
                }),
                connect_gate: tokio::sync::Mutex::new(()),
                subscriptions: Mutex::new(SubscriptionTable::default()),
                flights: Mutex::new(HashMap::new()),
                events,
                last_inbound: Mutex::new(Instant::now()),
                account: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.shared.config
    }

    /// Default request deadline
    pub fn request_timeout(&self) -> Duration {
        self.shared.config.request_timeout
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.shared.link).status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Subscribe to connection lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Account details from the last successful `authorize`
    pub fn account(&self) -> Option<AccountInfo> {
        lock(&self.shared.account).clone()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Whether `req_id` is still awaiting a response
    pub fn is_pending(&self, req_id: u64) -> bool {
        lock(&self.shared.pending).contains_key(&req_id)
    }

    fn set_status(&self, status: ConnectionStatus) {
        lock(&self.shared.link).status = status;
    }

    /// Establish the connection
    ///
    /// Idempotent: concurrent callers wait on the same attempt and return once
    /// the link is up. Authorizes when a token is configured; a rejected
    /// authorization closes the link again.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        let _gate = self.shared.connect_gate.lock().await;
        if self.status() == ConnectionStatus::Connected {
            return Ok(());
        }

        self.set_status(ConnectionStatus::Connecting);
        let link = match self.open_link().await {
            Ok(link) => link,
            Err(e) => {
                self.set_status(ConnectionStatus::Disconnected);
                tracing::warn!(error = %e, "Connection attempt failed");
                return Err(e);
            }
        };

        let connector = self.clone();
        tokio::spawn(async move { connector.supervise(link).await });

        if let Err(e) = self.authorize().await {
            tracing::warn!(error = %e, "Authorization failed, closing connection");
            self.close_link();
            return Err(e);
        }
        let _ = self.shared.events.send(ConnectionEvent::Connected);
        Ok(())
    }

    /// Close the connection without reconnecting
    pub async fn disconnect(&self) {
        let _gate = self.shared.connect_gate.lock().await;
        self.close_link();
    }

    fn close_link(&self) {
        let close = {
            let mut link = lock(&self.shared.link);
            link.status = ConnectionStatus::Disconnected;
            link.close.take()
        };
        *lock(&self.shared.account) = None;
        if let Some(close) = close {
            let _ = close.send(());
        }
    }

    /// Dial and install a new link as the current one
    async fn open_link(&self) -> Result<OpenLink, ConnectorError> {
        let WsConnection { outbound, inbound } =
            self.shared.dialer.dial(&self.shared.config.url).await?;

        let (close_tx, close_rx) = oneshot::channel();
        let generation = {
            let mut link = lock(&self.shared.link);
            link.generation += 1;
            link.outbound = Some(outbound);
            link.close = Some(close_tx);
            link.status = ConnectionStatus::Connected;
            link.generation
        };
        *lock(&self.shared.last_inbound) = Instant::now();

        Ok(OpenLink {
            generation,
            inbound,
            close: close_rx,
        })
    }

    /// Drive links until the connection is closed or the reconnect budget runs out
    async fn supervise(self, mut link: OpenLink) {
        loop {
            let OpenLink {
                generation,
                inbound,
                close,
            } = link;
            let end = self.run_link(inbound, close).await;
            if !self.handle_link_end(generation, &end) {
                return;
            }
            link = match self.reconnect().await {
                Some(next) => next,
                None => return,
            };
        }
    }

    /// Dispatch, keep-alive and liveness for one socket
    async fn run_link(
        &self,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut close: oneshot::Receiver<()>,
    ) -> LinkEnd {
        let ping_every = self.shared.config.ping_interval;
        let silence_window = self.shared.config.silence_window;
        let check_every = (silence_window / 4).max(Duration::from_millis(10));

        let mut ping = interval_at(Instant::now() + ping_every, ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health = interval_at(Instant::now() + check_every, check_every);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut close => return LinkEnd::Requested,

                msg = inbound.recv() => match msg {
                    Some(text) => {
                        *lock(&self.shared.last_inbound) = Instant::now();
                        self.dispatch(&text);
                    }
                    None => return LinkEnd::Closed,
                },

                _ = ping.tick() => {
                    let connector = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = connector.ping().await {
                            tracing::debug!(error = %e, "Keep-alive ping failed");
                        }
                    });
                }

                _ = health.tick() => {
                    let silence = lock(&self.shared.last_inbound).elapsed();
                    if silence > silence_window {
                        tracing::warn!(silence_ms = silence.as_millis() as u64, "Connection stale, forcing reconnect");
                        return LinkEnd::Stale(silence);
                    }
                }
            }
        }
    }

    /// Tear down a finished link; returns whether to reconnect
    fn handle_link_end(&self, generation: u64, end: &LinkEnd) -> bool {
        let reconnect = {
            let mut link = lock(&self.shared.link);
            if link.generation != generation {
                return false;
            }
            link.outbound = None;
            link.close = None;
            let requested = matches!(end, LinkEnd::Requested)
                || link.status == ConnectionStatus::Disconnected;
            link.status = if requested {
                ConnectionStatus::Disconnected
            } else {
                ConnectionStatus::Reconnecting
            };
            !requested
        };

        let reason = end.describe();
        let failed = self.fail_pending(&reason);
        let released = self.clear_subscriptions();
        if reconnect {
            tracing::warn!(%reason, failed, released, "Connection lost");
        } else {
            tracing::info!(%reason, failed, released, "Connection closed");
        }
        let _ = self
            .shared
            .events
            .send(ConnectionEvent::Disconnected { reason });
        reconnect
    }

    /// Reject every pending request with a transport error
    fn fail_pending(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = lock(&self.shared.pending)
            .drain()
            .map(|(_, request)| request)
            .collect();
        let count = drained.len();
        for request in drained {
            let _ = request
                .resolver
                .send(Err(ConnectorError::Transport(reason.to_string())));
        }
        telemetry::set_gauge(GaugeMetric::PendingRequests, 0.0);
        count
    }

    /// Bounded, jittered redial; `None` once reconnecting is abandoned
    async fn reconnect(&self) -> Option<OpenLink> {
        let backoff = self.shared.config.backoff();
        let max_attempts = self.shared.config.max_reconnect_attempts;

        for attempt in 1..=max_attempts {
            let delay = backoff.delay(attempt, &mut rand::thread_rng());
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            telemetry::incr_counter(CounterMetric::Reconnects);
            let _ = self
                .shared
                .events
                .send(ConnectionEvent::Reconnecting { attempt, delay });
            tokio::time::sleep(delay).await;

            let _gate = self.shared.connect_gate.lock().await;
            match self.status() {
                ConnectionStatus::Reconnecting => {}
                status => {
                    tracing::debug!(?status, "Reconnect no longer needed");
                    return None;
                }
            }

            match self.open_link().await {
                Ok(link) => {
                    tracing::info!(attempt, "Reconnected");
                    // The authorize response is dispatched by the new link's loop
                    let connector = self.clone();
                    tokio::spawn(async move { connector.reauthorize(attempt).await });
                    return Some(link);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Reconnect attempt failed");
                }
            }
        }

        self.set_status(ConnectionStatus::Fatal);
        tracing::error!(attempts = max_attempts, "Reconnect budget exhausted");
        let _ = self.shared.events.send(ConnectionEvent::Fatal {
            attempts: max_attempts,
        });
        None
    }

    async fn reauthorize(&self, attempt: u32) {
        if let Err(e) = self.authorize().await {
            tracing::warn!(error = %e, "Re-authorization failed");
        }
        let _ = self
            .shared
            .events
            .send(ConnectionEvent::Reconnected { attempt });
    }

    /// Send a correlated request with the default deadline
    pub async fn request(&self, payload: Value) -> Result<Value, ConnectorError> {
        self.send_request(payload, self.shared.config.request_timeout)
            .await
    }

    /// Send a correlated request and await its response
    ///
    /// The payload must be a JSON object; a unique `req_id` is added.
    pub async fn send_request(
        &self,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, ConnectorError> {
        self.transmit(payload, timeout, None).await
    }

    pub(super) async fn transmit(
        &self,
        payload: Value,
        timeout: Duration,
        opens: Option<String>,
    ) -> Result<Value, ConnectorError> {
        let Value::Object(mut body) = payload else {
            return Err(ConnectorError::Validation(
                "request payload must be a JSON object".into(),
            ));
        };
        let kind = protocol::request_kind(&body);
        let req_id = self.shared.next_req_id.fetch_add(1, Ordering::Relaxed);
        body.insert("req_id".to_string(), Value::from(req_id));
        let frame = Value::Object(body).to_string();

        let outbound = {
            let link = lock(&self.shared.link);
            match (link.status, link.outbound.as_ref()) {
                (ConnectionStatus::Fatal, _) => {
                    return Err(ConnectorError::FatalConnection {
                        attempts: self.shared.config.max_reconnect_attempts,
                    })
                }
                (_, Some(outbound)) => outbound.clone(),
                (_, None) => return Err(ConnectorError::NotConnected),
            }
        };

        let (resolver, response) = oneshot::channel();
        let pending = {
            let mut map = lock(&self.shared.pending);
            map.insert(
                req_id,
                PendingRequest {
                    resolver,
                    kind,
                    sent_at: Instant::now(),
                    opens,
                },
            );
            map.len()
        };
        telemetry::set_gauge(GaugeMetric::PendingRequests, pending as f64);
        let _registration = Registration {
            shared: &self.shared,
            req_id,
        };

        outbound
            .send(frame)
            .map_err(|_| ConnectorError::Transport("connection writer closed".into()))?;
        tracing::debug!(req_id, kind, "Request sent");

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ConnectorError::Transport(
                "request dropped by connection".into(),
            )),
            Err(_) => {
                tracing::warn!(req_id, kind, "Request timed out");
                Err(ConnectorError::TimedOut {
                    req_id,
                    after: timeout,
                })
            }
        }
    }

    /// Route one inbound frame
    ///
    /// Responses resolve their pending request; pushes go to the listeners of
    /// their subscription; anything else is logged and dropped.
    pub fn dispatch(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed message");
                telemetry::incr_counter(CounterMetric::DroppedMessages);
                return;
            }
        };

        if let Some(req_id) = message.get("req_id").and_then(Value::as_u64) {
            let pending = lock(&self.shared.pending).remove(&req_id);
            if let Some(request) = pending {
                telemetry::record_request(request.kind, request.sent_at.elapsed());
                let outcome = match protocol::error_of(&message) {
                    Some(error) => Err(error),
                    None => Ok(message),
                };
                if let Some(key) = &request.opens {
                    self.complete_opening(key, &outcome);
                }
                if request.resolver.send(outcome).is_err() {
                    tracing::debug!(req_id, "Requester went away before the response");
                }
                return;
            }
        }

        if let Some(subscription_id) = protocol::subscription_id(&message) {
            if !self.route_push(&subscription_id, message) {
                tracing::debug!(%subscription_id, "Dropping push for unknown subscription");
                telemetry::incr_counter(CounterMetric::DroppedMessages);
            }
            return;
        }

        tracing::debug!(
            msg_type = protocol::msg_type(&message).unwrap_or("unknown"),
            "Dropping unmatched message"
        );
        telemetry::incr_counter(CounterMetric::DroppedMessages);
    }

    async fn authorize(&self) -> Result<Option<AccountInfo>, ConnectorError> {
        let Some(token) = self.shared.config.api_token.clone() else {
            return Ok(None);
        };

        let response = self.request(requests::authorize(&token)).await?;
        let account = AccountInfo::from_response(&response)?;
        tracing::info!(
            login_id = %account.login_id,
            currency = %account.currency,
            balance = %account.balance,
            "Authorized"
        );
        *lock(&self.shared.account) = Some(account.clone());
        Ok(Some(account))
    }

    /// Round-trip a keep-alive ping
    pub async fn ping(&self) -> Result<(), ConnectorError> {
        self.request(requests::ping()).await.map(|_| ())
    }
}
