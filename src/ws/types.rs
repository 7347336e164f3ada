//! Connector types and configuration

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Token sent with `authorize` after every (re)connect
    pub api_token: Option<String>,
    /// Default deadline for correlated requests
    pub request_timeout: Duration,
    /// Maximum reconnection attempts before the connection is declared lost
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt
    pub initial_reconnect_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,
    /// Upper bound of the random jitter added to each reconnect delay
    pub reconnect_jitter: Duration,
    /// Interval for keep-alive pings
    pub ping_interval: Duration,
    /// Inbound silence after which the socket is treated as half-open
    pub silence_window: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_token: None,
            request_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            reconnect_jitter: Duration::from_millis(500),
            ping_interval: Duration::from_secs(30),
            silence_window: Duration::from_secs(60),
        }
    }
}

impl ConnectorConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the API token used for authorization
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set the default request deadline
    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    /// Set maximum reconnection attempts
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Set initial reconnection delay
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }

    /// Set maximum reconnection delay
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_reconnect_delay = d;
        self
    }

    /// Set the reconnect jitter bound
    pub fn jitter(mut self, d: Duration) -> Self {
        self.reconnect_jitter = d;
        self
    }

    /// Set ping interval
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// Set the stale-connection silence window
    pub fn silence_window(mut self, d: Duration) -> Self {
        self.silence_window = d;
        self
    }

    /// Backoff schedule derived from this config
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: self.initial_reconnect_delay,
            cap: self.max_reconnect_delay,
            jitter: self.reconnect_jitter,
        }
    }
}

/// Exponential reconnect backoff with additive jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Backoff {
    /// Deterministic delay before attempt `attempt` (1-based): `min(base * 2^(n-1), cap)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Delay before attempt `attempt` including a uniform jitter in `[0, jitter]`
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(extra)
    }
}

/// Link status as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted
    Fatal,
}

/// Connection lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// First connection established
    Connected,
    /// Link lost or closed
    Disconnected { reason: String },
    /// Reconnect attempt scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Link re-established; subscriptions must be renewed by their owners
    Reconnected { attempt: u32 },
    /// Reconnect budget exhausted
    Fatal { attempts: u32 },
}

/// Connector errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectorError {
    /// Socket closed, unreachable, or the writer went away
    #[error("Transport error: {0}")]
    Transport(String),
    /// No live connection
    #[error("Not connected")]
    NotConnected,
    /// The venue answered with an error payload
    #[error("Protocol error [{code}]: {message}")]
    Protocol { code: String, message: String },
    /// Malformed or out-of-range response fields
    #[error("Validation error: {0}")]
    Validation(String),
    /// No response before the deadline
    #[error("Request {req_id} timed out after {after:?}")]
    TimedOut { req_id: u64, after: Duration },
    /// Reconnect budget exhausted
    #[error("Connection lost after {attempts} reconnect attempts")]
    FatalConnection { attempts: u32 },
}

impl ConnectorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectorError::FatalConnection { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transport(_) | ConnectorError::NotConnected
        )
    }
}
