//! Configuration types for tickbot

use crate::signal::{StrategyId, ThresholdTiers};
use crate::telemetry::LogFormat;
use crate::ws::ConnectorConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable consulted when no API token is configured
pub const API_TOKEN_ENV: &str = "TICKBOT_API_TOKEN";

/// Deepest martingale level a config may ask for
pub const MAX_MARTINGALE_LEVEL: u32 = 30;
/// Largest accepted martingale multiplier
pub const MAX_MARTINGALE_MULTIPLIER: Decimal = Decimal::TEN;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub session: SessionConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Venue connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    /// API token used for `authorize`; falls back to `TICKBOT_API_TOKEN`
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    pub ping_interval_secs: u64,
    /// Inbound silence tolerated before the socket is treated as half-open
    pub silence_window_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_jitter_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "wss://ws.derivws.com/websockets/v3?app_id=1089".to_string(),
            api_token: None,
            request_timeout_ms: 10_000,
            ping_interval_secs: 30,
            silence_window_secs: 60,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_jitter_ms: 500,
            max_reconnect_attempts: 10,
        }
    }
}

impl ConnectionConfig {
    /// Configured token, or the one from the environment
    pub fn resolved_token(&self) -> Option<String> {
        self.api_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build the connector configuration
    pub fn to_connector_config(&self) -> ConnectorConfig {
        let mut config = ConnectorConfig::new(self.url.clone())
            .request_timeout(self.request_timeout())
            .max_reconnects(self.max_reconnect_attempts)
            .initial_delay(Duration::from_millis(self.reconnect_base_delay_ms))
            .max_delay(Duration::from_millis(self.reconnect_max_delay_ms))
            .jitter(Duration::from_millis(self.reconnect_jitter_ms))
            .ping_interval(Duration::from_secs(self.ping_interval_secs))
            .silence_window(Duration::from_secs(self.silence_window_secs));
        if let Some(token) = self.resolved_token() {
            config = config.api_token(token);
        }
        config
    }
}

/// Execution loop variant
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One trade at a time, awaited to settlement
    #[default]
    Serialized,
    /// React per tick under a latency budget
    Ultra,
}

impl std::str::FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serialized" => Ok(SessionMode::Serialized),
            "ultra" => Ok(SessionMode::Ultra),
            other => Err(format!("unknown session mode '{other}'")),
        }
    }
}

/// Trading session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub symbol: String,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_duration_ticks")]
    pub contract_duration_ticks: u32,
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_warmup_ticks")]
    pub warmup_ticks: usize,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_monitor_timeout_secs")]
    pub monitor_timeout_secs: u64,
    /// Budget for quote + purchase in ultra mode
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_currency() -> String {
    "USD".to_string()
}
fn default_duration_ticks() -> u32 {
    1
}
fn default_window_capacity() -> usize {
    100
}
fn default_warmup_ticks() -> usize {
    100
}
fn default_cooldown_ms() -> u64 {
    2_000
}
fn default_monitor_timeout_secs() -> u64 {
    30
}
fn default_latency_budget_ms() -> u64 {
    1_500
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl SessionConfig {
    /// Session config with defaults for everything but the symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            mode: SessionMode::default(),
            currency: default_currency(),
            contract_duration_ticks: default_duration_ticks(),
            window_capacity: default_window_capacity(),
            warmup_ticks: default_warmup_ticks(),
            cooldown_ms: default_cooldown_ms(),
            monitor_timeout_secs: default_monitor_timeout_secs(),
            latency_budget_ms: default_latency_budget_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_secs)
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Risk management configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    pub base_stake: Decimal,
    #[serde(default = "default_multiplier")]
    pub martingale_multiplier: Decimal,
    #[serde(default = "default_max_level")]
    pub max_martingale_level: u32,
    /// Largest stake as a fraction of balance
    #[serde(default = "default_max_stake_fraction")]
    pub max_stake_fraction: Decimal,
    /// Venue minimum stake
    #[serde(default = "default_min_stake")]
    pub min_stake: Decimal,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Trades opened per rolling minute (0 = unlimited)
    #[serde(default = "default_max_trades_per_minute")]
    pub max_trades_per_minute: usize,
    /// Starting balance when the venue does not report one
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
}

fn default_multiplier() -> Decimal {
    Decimal::new(2, 0)
}
fn default_max_level() -> u32 {
    5
}
fn default_max_stake_fraction() -> Decimal {
    Decimal::new(10, 2) // 0.10 = 10%
}
fn default_min_stake() -> Decimal {
    Decimal::new(35, 2) // 0.35
}
fn default_max_trades_per_minute() -> usize {
    10
}
fn default_initial_balance() -> Decimal {
    Decimal::new(1000, 0)
}

impl RiskConfig {
    /// Risk config with defaults around a base stake
    pub fn with_base_stake(base_stake: Decimal) -> Self {
        Self {
            base_stake,
            martingale_multiplier: default_multiplier(),
            max_martingale_level: default_max_level(),
            max_stake_fraction: default_max_stake_fraction(),
            min_stake: default_min_stake(),
            take_profit: None,
            stop_loss: None,
            max_trades_per_minute: default_max_trades_per_minute(),
            initial_balance: default_initial_balance(),
        }
    }
}

/// Strategy selection and tuning
///
/// Every optional field overrides the preset of the selected kind.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyId,
    pub tiers: Option<ThresholdTiers>,
    pub min_samples: Option<usize>,
    pub trend_ticks: Option<usize>,
    pub max_entropy: Option<f64>,
    /// Over/under split point: digits below go under, the rest over
    pub split: u8,
    pub differs_low: u8,
    pub differs_high: u8,
    /// Percent share below which a digit counts as rare
    pub rarity_threshold: Option<Decimal>,
    pub decline_ticks: Option<usize>,
    pub absence_ticks: Option<usize>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyId::EvenOdd,
            tiers: None,
            min_samples: None,
            trend_ticks: None,
            max_entropy: None,
            split: 5,
            differs_low: 2,
            differs_high: 7,
            rarity_threshold: None,
            decline_ticks: None,
            absence_ticks: None,
        }
    }
}

impl StrategyConfig {
    pub fn of_kind(kind: StrategyId) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
}

/// Execution mode: paper trading or live
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

/// In-process paper venue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: Decimal,
    pub currency: String,
    /// Tick cadence; 0 disables generated ticks
    pub tick_interval_ms: u64,
    /// House margin taken from fair payout
    pub payout_margin: Decimal,
    pub seed: Option<u64>,
    pub symbols: Vec<String>,
    pub pip_size: u32,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::new(1000, 0),
            currency: "USD".to_string(),
            tick_interval_ms: 1_000,
            payout_margin: Decimal::new(5, 2), // 0.05
            seed: None,
            symbols: vec!["R_10".into(), "R_50".into(), "R_100".into()],
            pip_size: 2,
        }
    }
}

impl PaperConfig {
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut problems = Vec::new();

        if self.session.symbol.trim().is_empty() {
            problems.push("session.symbol must not be empty".to_string());
        }
        if self.session.window_capacity == 0 {
            problems.push("session.window_capacity must be > 0".to_string());
        }
        if self.session.contract_duration_ticks == 0 {
            problems.push("session.contract_duration_ticks must be > 0".to_string());
        }
        if self.risk.base_stake <= Decimal::ZERO {
            problems.push("risk.base_stake must be > 0".to_string());
        }
        if self.risk.martingale_multiplier < Decimal::ONE
            || self.risk.martingale_multiplier > MAX_MARTINGALE_MULTIPLIER
        {
            problems.push(format!(
                "risk.martingale_multiplier must be in [1, {MAX_MARTINGALE_MULTIPLIER}]"
            ));
        }
        if self.risk.max_martingale_level > MAX_MARTINGALE_LEVEL {
            problems.push(format!(
                "risk.max_martingale_level must be <= {MAX_MARTINGALE_LEVEL}"
            ));
        }
        if self.risk.max_stake_fraction <= Decimal::ZERO || self.risk.max_stake_fraction > Decimal::ONE
        {
            problems.push("risk.max_stake_fraction must be in (0, 1]".to_string());
        }
        if matches!(self.risk.take_profit, Some(tp) if tp <= Decimal::ZERO) {
            problems.push("risk.take_profit must be > 0".to_string());
        }
        if matches!(self.risk.stop_loss, Some(sl) if sl <= Decimal::ZERO) {
            problems.push("risk.stop_loss must be > 0".to_string());
        }
        if let Some(tiers) = &self.strategy.tiers {
            if !tiers.is_ordered() {
                problems.push("strategy.tiers must satisfy building <= ready <= strong".to_string());
            }
        }
        if self.strategy.split == 0 || self.strategy.split > 9 {
            problems.push("strategy.split must be in 1..=9".to_string());
        }
        if self.strategy.differs_low > self.strategy.differs_high || self.strategy.differs_high > 9 {
            problems.push("strategy differs range must be ordered digits".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("invalid configuration: {}", problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [session]
        symbol = "R_100"

        [risk]
        base_stake = 0.35
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.session.symbol, "R_100");
        assert_eq!(config.session.mode, SessionMode::Serialized);
        assert_eq!(config.risk.martingale_multiplier, dec!(2));
        assert_eq!(config.strategy.kind, StrategyId::EvenOdd);
        assert_eq!(config.execution.mode, ExecutionMode::Paper);
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_deserialize() {
        let toml = r#"
            [connection]
            url = "wss://example.test/ws"
            request_timeout_ms = 5000
            reconnect_jitter_ms = 250

            [session]
            symbol = "R_50"
            mode = "ultra"
            latency_budget_ms = 800

            [risk]
            base_stake = 1.0
            martingale_multiplier = 2.5
            take_profit = 10
            stop_loss = 50

            [strategy]
            kind = "differs_advanced"
            differs_low = 3
            differs_high = 6
            tiers = { building = 50, ready = 55, strong = 60 }

            [execution]
            mode = "live"

            [telemetry]
            log_level = "debug"
            log_format = "json"
            metrics_port = 9100
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.session.mode, SessionMode::Ultra);
        assert_eq!(config.session.latency_budget(), Duration::from_millis(800));
        assert_eq!(config.risk.take_profit, Some(dec!(10)));
        assert_eq!(config.strategy.kind, StrategyId::DiffersAdvanced);
        assert_eq!(config.strategy.tiers.unwrap().ready, dec!(55));
        assert_eq!(config.execution.mode, ExecutionMode::Live);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert_eq!(config.telemetry.metrics_port, Some(9100));

        let connector = config.connection.to_connector_config();
        assert_eq!(connector.url, "wss://example.test/ws");
        assert_eq!(connector.reconnect_jitter, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.risk.base_stake = dec!(0);
        config.session.window_capacity = 0;
        config.strategy.tiers = Some(ThresholdTiers::new(dec!(60), dec!(55), dec!(70)));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("base_stake"));
        assert!(err.contains("window_capacity"));
        assert!(err.contains("tiers"));
    }

    #[test]
    fn test_validate_bounds_martingale_growth() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.risk.max_martingale_level = 100;
        config.risk.martingale_multiplier = dec!(25);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_martingale_level"));
        assert!(err.contains("martingale_multiplier"));

        config.risk.max_martingale_level = MAX_MARTINGALE_LEVEL;
        config.risk.martingale_multiplier = dec!(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_mode_from_str() {
        assert_eq!("ULTRA".parse::<SessionMode>(), Ok(SessionMode::Ultra));
        assert!("fast".parse::<SessionMode>().is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.risk.base_stake, dec!(0.35));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_paper_tick_interval_disabled_at_zero() {
        let paper = PaperConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(paper.tick_interval().is_none());
        assert_eq!(
            PaperConfig::default().tick_interval(),
            Some(Duration::from_secs(1))
        );
    }
}
