//! CLI interface for tickbot
//!
//! Provides subcommands for:
//! - `run`: Start a trading session
//! - `symbols`: List tradable symbols and their contract types
//! - `stats`: Digit statistics over recent ticks
//! - `config`: Show the effective configuration

mod run;
mod stats;
mod symbols;

pub use run::RunArgs;
pub use stats::StatsArgs;
pub use symbols::SymbolsArgs;

use crate::config::{Config, ExecutionMode};
use crate::execution::PaperVenue;
use crate::ws::Connector;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Token presented to the paper venue when none is configured
const PAPER_TOKEN: &str = "paper";

#[derive(Parser, Debug)]
#[command(name = "tickbot")]
#[command(about = "Digit-contract trading bot over a multiplexed WebSocket")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a trading session
    Run(RunArgs),
    /// List tradable symbols
    Symbols(SymbolsArgs),
    /// Digit statistics over recent ticks
    Stats(StatsArgs),
    /// Show the effective configuration
    Config,
}

/// A connected venue, paper or live
///
/// Dropping it stops the paper venue's tick generator.
pub struct VenueLink {
    pub connector: Connector,
    ticker: Option<JoinHandle<()>>,
}

impl VenueLink {
    /// Connect according to `execution.mode`
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let mut connector_config = config.connection.to_connector_config();

        let (connector, ticker) = match config.execution.mode {
            ExecutionMode::Paper => {
                let venue = PaperVenue::new(config.paper.clone());
                let ticker = venue.spawn_ticker();
                if connector_config.api_token.is_none() {
                    connector_config = connector_config.api_token(PAPER_TOKEN);
                }
                tracing::info!(symbols = ?config.paper.symbols, "Using paper venue");
                (Connector::with_dialer(connector_config, Arc::new(venue)), ticker)
            }
            ExecutionMode::Live => {
                tracing::info!(url = %connector_config.url, "Connecting to venue");
                (Connector::new(connector_config), None)
            }
        };

        connector.connect().await?;
        Ok(Self { connector, ticker })
    }

    pub async fn close(self) {
        self.connector.disconnect().await;
    }
}

impl Drop for VenueLink {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Print the configuration as TOML with the token masked
pub fn print_config(config: &Config) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if shown.connection.api_token.is_some() {
        shown.connection.api_token = Some("********".to_string());
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
